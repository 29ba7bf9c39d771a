//! The `Entity` trait and the per-tick update contract.

use std::any::Any;

use mts_buffer::CellRegistration;
use mts_core::{CellId, EntityId, Timeslice, WorkerId};

use crate::bus::{Envelope, Message, MessageBus};
use crate::latch::{ErrorLatch, KernelFault};

// ── UpdateStatus ──────────────────────────────────────────────────────────────

/// The control part of an [`UpdateStatus`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum UpdateState {
    /// Keep ticking this entity.
    Continue,
    /// The entity is finished; remove it from the simulation between ticks.
    Done,
}

/// What one `frame_tick` tells the owning worker.
///
/// Besides the continue/done decision, an entity may hand over cell
/// registrations to add to (or ids to remove from) its worker's flip
/// registry.  An entity may only register or deregister *its own* cells —
/// the worker never checks, the type system does: registrations are minted
/// from the `Shared` writer handle, which only the owner holds.
#[derive(Default, Debug)]
#[must_use]
pub struct UpdateStatus {
    pub state: UpdateState,
    /// Cells to start flipping from the next tick on.
    pub to_add: Vec<CellRegistration>,
    /// Cells to stop flipping from the next tick on.
    pub to_remove: Vec<CellId>,
}

impl Default for UpdateState {
    fn default() -> Self {
        UpdateState::Continue
    }
}

impl UpdateStatus {
    /// Plain "keep going", no registry changes.
    pub fn proceed() -> Self {
        Self { state: UpdateState::Continue, ..Default::default() }
    }

    /// Plain "finished", no registry changes.
    pub fn done() -> Self {
        Self { state: UpdateState::Done, ..Default::default() }
    }

    pub fn add_cell(mut self, registration: CellRegistration) -> Self {
        self.to_add.push(registration);
        self
    }

    pub fn remove_cell(mut self, id: CellId) -> Self {
        self.to_remove.push(id);
        self
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.state == UpdateState::Done
    }
}

// ── TickContext ───────────────────────────────────────────────────────────────

/// Per-tick services handed to every entity update by its worker.
///
/// Carries the current timeslice and the communication endpoints.  It is
/// rebuilt each tick; entities must not stash any part of it.
pub struct TickContext<'a> {
    pub now: Timeslice,
    pub base_gran_ms: u32,
    /// The worker running this update.
    pub worker: WorkerId,
    bus: &'a MessageBus,
    latch: &'a ErrorLatch,
    /// Same-tick deliveries drained by the worker right after the current
    /// entity's update returns.
    immediate: &'a mut Vec<Envelope>,
}

impl<'a> TickContext<'a> {
    pub fn new(
        now: Timeslice,
        base_gran_ms: u32,
        worker: WorkerId,
        bus: &'a MessageBus,
        latch: &'a ErrorLatch,
        immediate: &'a mut Vec<Envelope>,
    ) -> Self {
        Self { now, base_gran_ms, worker, bus, latch, immediate }
    }

    /// Deliver `msg` to `to` within the current tick.
    ///
    /// Only valid when `to` lives on the same worker; the worker reports a
    /// cross-thread attempt as a per-entity error and drops the message.
    pub fn send_now(&mut self, to: EntityId, from: EntityId, msg: Message) {
        self.immediate.push(Envelope { to, from: Some(from), msg });
    }

    /// Deliver `msg` to `to` at the start of the next tick, whichever worker
    /// owns it by then.
    pub fn schedule(&self, to: EntityId, from: Option<EntityId>, msg: Message) {
        self.bus.schedule(Envelope { to, from, msg });
    }

    /// Publish `msg` to every subscriber of `event`; visible next tick.
    pub fn publish_event(&self, event: u32, from: EntityId, msg: Message) {
        self.bus.publish_event(event, from, msg);
    }

    /// Subscribe `who` to `event` publications.
    pub fn subscribe(&self, event: u32, who: EntityId) {
        self.bus.subscribe(event, who);
    }

    /// Latch a kernel-integrity fault.  The main thread tears the run down
    /// at the next barrier; the current tick still runs to completion.
    pub fn raise_fatal(&self, fault: KernelFault) {
        self.latch.raise(fault);
    }
}

// ── Entity ────────────────────────────────────────────────────────────────────

/// A tickable unit owned by exactly one worker at a time.
///
/// Lifecycle: constructed externally → pushed into the pending queue →
/// staged by the work group once `start_ms() <= now.ms` → assigned to a
/// worker → `frame_init` once, then `frame_tick` every stride-tick until it
/// returns [`Done`](UpdateState::Done) → removed and dropped between ticks.
///
/// During `frame_tick` an entity may `get()` any shared cell but may only
/// `set()` its own — the flip between barriers is what publishes the writes.
pub trait Entity: Send {
    /// Immutable run-unique id.
    fn id(&self) -> EntityId;

    /// Milliseconds from the simulation epoch at which this entity becomes
    /// active.
    fn start_ms(&self) -> u64 {
        0
    }

    /// Ghost entity mirroring a remote partition?  Fakes tick like any other
    /// entity but are excluded from outputs and census accounting.
    fn is_fake(&self) -> bool {
        false
    }

    /// The worker currently managing this entity, if assigned.
    fn current_worker(&self) -> Option<WorkerId>;

    /// Called by the work group on assignment and migration.
    fn set_current_worker(&mut self, worker: Option<WorkerId>);

    /// The cells this entity owns, registered with its worker's registry at
    /// assignment and deregistered at removal.
    fn subscriptions(&self) -> Vec<CellRegistration> {
        Vec::new()
    }

    /// One-time initialisation, run before the first `frame_tick`.
    fn frame_init(&mut self, _ctx: &mut TickContext<'_>) {}

    /// Advance one tick.
    fn frame_tick(&mut self, ctx: &mut TickContext<'_>) -> UpdateStatus;

    /// Deliver one message.  Runs on the owning worker's thread, before the
    /// same tick's `frame_tick`.
    fn handle_message(
        &mut self,
        _from: Option<EntityId>,
        _msg: &Message,
        _ctx: &mut TickContext<'_>,
    ) {
    }

    /// Reclaim the concrete type at staging time (loaders downcast staged
    /// entities to route them, e.g. persons into their starting conflux).
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}
