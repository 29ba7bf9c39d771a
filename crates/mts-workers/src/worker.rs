//! The worker thread: entity list, registry, and the per-tick loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread::JoinHandle;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use mts_buffer::BufferRegistry;
use mts_core::{EntityId, Timeslice, WorkerId};
use mts_entity::{BusError, Entity, Envelope, ErrorLatch, MessageBus, TickContext, UpdateStatus};

// ── TickAction ────────────────────────────────────────────────────────────────

/// How one tick is run for one entity.  The work group hands this to every
/// worker at construction; swapping it is how collaborators instrument or
/// profile updates without touching the worker loop.
pub trait TickAction: Send + Sync + 'static {
    fn tick(&self, entity: &mut dyn Entity, ctx: &mut TickContext<'_>) -> UpdateStatus;
}

/// The default action: call the entity's own `frame_tick`.
pub struct EntityTickAction;

impl TickAction for EntityTickAction {
    fn tick(&self, entity: &mut dyn Entity, ctx: &mut TickContext<'_>) -> UpdateStatus {
        entity.frame_tick(ctx)
    }
}

// ── Inboxes ───────────────────────────────────────────────────────────────────

/// Cross-thread mailbox of one worker.  The main thread writes during its
/// barrier window; the worker drains at the top of its next cycle.  Peers
/// write migrated entities here between ticks.
#[derive(Default)]
pub(crate) struct WorkerInbox {
    pub(crate) state: Mutex<InboxState>,
}

#[derive(Default)]
pub(crate) struct InboxState {
    /// Entities to adopt (staged arrivals and migrations in).
    pub(crate) to_add: Vec<Box<dyn Entity>>,
    /// Messages for entities owned by this worker, due this tick.
    pub(crate) messages: Vec<Envelope>,
    /// Entities to hand to another worker before the next update phase.
    pub(crate) migrate_out: Vec<(EntityId, WorkerId)>,
}

impl WorkerInbox {
    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, InboxState> {
        self.state.lock().expect("worker inbox poisoned")
    }
}

// ── Worker handle ─────────────────────────────────────────────────────────────

/// Main-thread handle to one worker.
pub(crate) struct WorkerHandle {
    pub(crate) id: WorkerId,
    pub(crate) inbox: Arc<WorkerInbox>,
    pub(crate) agent_count: Arc<AtomicUsize>,
    pub(crate) join: Option<JoinHandle<()>>,
}

/// Everything a worker thread needs, moved into the spawned closure.
pub(crate) struct WorkerSetup {
    pub(crate) id: WorkerId,
    pub(crate) inbox: Arc<WorkerInbox>,
    pub(crate) all_inboxes: Vec<Arc<WorkerInbox>>,
    pub(crate) agent_count: Arc<AtomicUsize>,
    pub(crate) shared: Arc<Barrier>,
    pub(crate) external: Arc<Barrier>,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) latch: Arc<ErrorLatch>,
    pub(crate) bus: Arc<MessageBus>,
    pub(crate) removal: Arc<Mutex<Vec<EntityId>>>,
    pub(crate) action: Arc<dyn TickAction>,
    pub(crate) base_gran_ms: u32,
    pub(crate) tick_step: u32,
    pub(crate) aura_active: bool,
}

/// One owned entity plus its init flag.
struct Slot {
    entity: Box<dyn Entity>,
    inited: bool,
}

/// The worker thread body.
pub(crate) fn run_worker(setup: WorkerSetup) {
    let WorkerSetup {
        id,
        inbox,
        all_inboxes,
        agent_count,
        shared,
        external,
        stop,
        latch,
        bus,
        removal,
        action,
        base_gran_ms,
        tick_step,
        aura_active,
    } = setup;

    let mut slots: Vec<Slot> = Vec::new();
    let mut index: FxHashMap<EntityId, usize> = FxHashMap::default();
    let mut registry = BufferRegistry::new();
    let mut frame: u64 = 0;

    debug!(worker = %id, "worker started");

    loop {
        // ── Adopt staged arrivals and collect messages ────────────────────
        let (to_add, mut messages) = {
            let mut state = inbox.lock();
            (std::mem::take(&mut state.to_add), std::mem::take(&mut state.messages))
        };

        for mut entity in to_add {
            entity.set_current_worker(Some(id));
            for reg in entity.subscriptions() {
                registry.queue_add(reg);
            }
            index.insert(entity.id(), slots.len());
            slots.push(Slot { entity, inited: false });
        }

        // Per-entity message batches, delivered just before that entity's
        // update.
        let mut mailbags: FxHashMap<EntityId, Vec<Envelope>> = FxHashMap::default();
        for env in messages.drain(..) {
            mailbags.entry(env.to).or_default().push(env);
        }

        // ── Update phase ──────────────────────────────────────────────────
        let now = Timeslice::new(frame, base_gran_ms);
        let mut retired: Vec<usize> = Vec::new();
        let mut immediate: Vec<Envelope> = Vec::new();

        for i in 0..slots.len() {
            let ent_id = slots[i].entity.id();

            if let Some(bag) = mailbags.remove(&ent_id) {
                for env in bag {
                    let mut ctx =
                        TickContext::new(now, base_gran_ms, id, &bus, &latch, &mut immediate);
                    slots[i].entity.handle_message(env.from, &env.msg, &mut ctx);
                }
            }

            if !slots[i].inited {
                let mut ctx =
                    TickContext::new(now, base_gran_ms, id, &bus, &latch, &mut immediate);
                slots[i].entity.frame_init(&mut ctx);
                slots[i].inited = true;
            }

            let status = {
                let slot = &mut slots[i];
                let mut ctx =
                    TickContext::new(now, base_gran_ms, id, &bus, &latch, &mut immediate);
                catch_unwind(AssertUnwindSafe(|| action.tick(slot.entity.as_mut(), &mut ctx)))
            };
            let status = match status {
                Ok(status) => status,
                Err(_) => {
                    // A panicking update retires the entity; the run goes on.
                    warn!(worker = %id, entity = %ent_id, "entity update panicked; retiring");
                    UpdateStatus::done()
                }
            };

            let done = status.is_done();
            for reg in status.to_add {
                registry.queue_add(reg);
            }
            for cell in status.to_remove {
                registry.queue_remove(cell);
            }
            if done {
                retired.push(i);
            }

            // Same-tick deliveries requested by this entity's update.
            deliver_immediate(&mut immediate, &mut slots, &index, id, now, base_gran_ms, &bus, &latch);
        }

        // ── Retire finished entities ──────────────────────────────────────
        for &pos in retired.iter().rev() {
            let slot = slots.swap_remove(pos);
            let ent_id = slot.entity.id();
            reindex(&mut index, &slots, pos, ent_id);
            for reg in slot.entity.subscriptions() {
                registry.queue_remove(reg.id());
            }
            bus.unsubscribe_all(ent_id);
            removal.lock().expect("removal list poisoned").push(ent_id);
            // Box dropped here; this is the entity's destruction point.
        }
        agent_count.store(slots.len(), Ordering::Relaxed);

        // ── Barriers, migration out, and flip ─────────────────────────────
        //
        // Migrations are applied in the inter-tick window so the target
        // worker finds the entity in its inbox before its next update phase.
        shared.wait();
        let migrate_out = std::mem::take(&mut inbox.lock().migrate_out);
        for (ent_id, target) in migrate_out {
            if let Some(&pos) = index.get(&ent_id) {
                let mut slot = slots.swap_remove(pos);
                reindex(&mut index, &slots, pos, ent_id);
                slot.entity.set_current_worker(None);
                for reg in slot.entity.subscriptions() {
                    registry.queue_remove(reg.id());
                }
                all_inboxes[target.index()].lock().to_add.push(slot.entity);
            }
        }
        registry.flip_all();
        external.wait();
        if aura_active {
            external.wait();
        }
        if stop.load(Ordering::Acquire) {
            break;
        }
        frame += tick_step as u64;
    }

    debug!(worker = %id, entities = slots.len(), "worker stopped");
}

/// Fix the index after a `swap_remove` at `pos` (the removed entity was
/// `removed`; the former last element, if any, now lives at `pos`).
fn reindex(index: &mut FxHashMap<EntityId, usize>, slots: &[Slot], pos: usize, removed: EntityId) {
    index.remove(&removed);
    if pos < slots.len() {
        index.insert(slots[pos].entity.id(), pos);
    }
}

/// Drain same-tick deliveries.  Recipients must live on this worker; a
/// cross-worker recipient is a per-entity error and the message is dropped.
#[allow(clippy::too_many_arguments)]
fn deliver_immediate(
    immediate: &mut Vec<Envelope>,
    slots: &mut [Slot],
    index: &FxHashMap<EntityId, usize>,
    worker: WorkerId,
    now: Timeslice,
    base_gran_ms: u32,
    bus: &MessageBus,
    latch: &ErrorLatch,
) {
    // A handler may send again; bound the cascade instead of looping forever.
    let mut hops = 0;
    while !immediate.is_empty() && hops < 16 {
        hops += 1;
        let batch = std::mem::take(immediate);
        for env in batch {
            match index.get(&env.to) {
                Some(&pos) => {
                    let mut ctx =
                        TickContext::new(now, base_gran_ms, worker, bus, latch, immediate);
                    slots[pos].entity.handle_message(env.from, &env.msg, &mut ctx);
                }
                None => {
                    let err = BusError::CrossThreadImmediate { to: env.to, worker: worker.0 };
                    warn!(worker = %worker, error = %err, "dropped immediate delivery");
                }
            }
        }
    }
    if !immediate.is_empty() {
        warn!(worker = %worker, "immediate delivery cascade cut off after 16 hops");
        immediate.clear();
    }
}
