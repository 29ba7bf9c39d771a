//! The work group: worker fleet, staging, migration, and teardown.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use mts_core::{EntityId, WorkerId};
use mts_entity::{
    Entity, ErrorLatch, KernelFault, MessageBus, PendingItem, PendingQueue, ScheduledEvent,
};

use crate::worker::{TickAction, WorkerHandle, WorkerInbox, WorkerSetup, run_worker};

// ── Loader ────────────────────────────────────────────────────────────────────

/// Hook the staging step runs for every due entity: route it to a worker, or
/// absorb it into some aggregate (the mid-term loader pushes persons into
/// their starting conflux and absorbs them).
pub trait EntityLoader: Send {
    fn route(&mut self, entity: Box<dyn Entity>) -> LoadDecision;
}

pub enum LoadDecision {
    /// Assign to the next worker round-robin.
    Assign(Box<dyn Entity>),
    /// Assign to the worker with the fewest entities.
    AssignLeastLoaded(Box<dyn Entity>),
    /// The loader took ownership; nothing reaches a worker directly.
    Absorbed,
}

/// Pass-through loader: every staged entity becomes a worker entity.
struct RoundRobinLoader;

impl EntityLoader for RoundRobinLoader {
    fn route(&mut self, entity: Box<dyn Entity>) -> LoadDecision {
        LoadDecision::Assign(entity)
    }
}

// ── StageReport ───────────────────────────────────────────────────────────────

/// What one `wait()` call did.
#[derive(Debug, Default, Clone, Copy)]
pub struct StageReport {
    /// False when the tick-step stride swallowed this call (no barriers hit).
    pub advanced: bool,
    /// Entities released from the pending queue this call.
    pub staged: usize,
    /// Entities erased from the global list this call.
    pub removed: usize,
    /// True when this was the final cycle: workers exit after their next
    /// barrier sequence.
    pub stopping: bool,
}

// ── WorkGroup ─────────────────────────────────────────────────────────────────

/// A fleet of workers sharing two N+1 barriers and a common tick stride.
pub struct WorkGroup {
    size: usize,
    end_tick: u64,
    tick_step: u32,
    aura_active: bool,
    base_gran_ms: u32,

    shared: Arc<Barrier>,
    external: Arc<Barrier>,
    stop: Arc<AtomicBool>,
    latch: Arc<ErrorLatch>,
    bus: Arc<MessageBus>,
    removal: Arc<Mutex<Vec<EntityId>>>,

    workers: Vec<WorkerHandle>,
    action: Option<Arc<dyn TickAction>>,
    loader: Box<dyn EntityLoader>,
    /// Optional "everything is drained" probe for end_tick == 0 runs whose
    /// entities live inside absorbers rather than on workers.
    drain_probe: Option<Box<dyn Fn() -> bool + Send>>,

    pending: PendingQueue,
    /// The global list: every live worker entity and its current worker.
    entity_workers: FxHashMap<EntityId, WorkerId>,

    tick_offset: u32,
    next_frame_to_stage: u64,
    next_worker: usize,
    started: bool,

    shared_hits: u64,
    external_hits: u64,
}

impl WorkGroup {
    pub fn new(
        size: usize,
        end_tick: u64,
        tick_step: u32,
        aura_active: bool,
        base_gran_ms: u32,
        bus: Arc<MessageBus>,
        latch: Arc<ErrorLatch>,
    ) -> Self {
        assert!(size > 0, "a work group needs at least one worker");
        assert!(tick_step > 0, "tick_step must be >= 1");
        Self {
            size,
            end_tick,
            tick_step,
            aura_active,
            base_gran_ms,
            shared: Arc::new(Barrier::new(size + 1)),
            external: Arc::new(Barrier::new(size + 1)),
            stop: Arc::new(AtomicBool::new(false)),
            latch,
            bus,
            removal: Arc::new(Mutex::new(Vec::new())),
            workers: Vec::new(),
            action: None,
            loader: Box::new(RoundRobinLoader),
            drain_probe: None,
            pending: PendingQueue::new(),
            entity_workers: FxHashMap::default(),
            tick_offset: 0,
            next_frame_to_stage: 0,
            next_worker: 0,
            started: false,
            shared_hits: 0,
            external_hits: 0,
        }
    }

    /// Create the N workers (not yet running) with the per-tick action.
    pub fn init_workers(&mut self, action: Arc<dyn TickAction>, loader: Box<dyn EntityLoader>) {
        self.action = Some(action);
        self.loader = loader;
        for i in 0..self.size {
            self.workers.push(WorkerHandle {
                id: WorkerId(i as u32),
                inbox: Arc::new(WorkerInbox::default()),
                agent_count: Arc::new(AtomicUsize::new(0)),
                join: None,
            });
        }
    }

    pub fn set_drain_probe(&mut self, probe: Box<dyn Fn() -> bool + Send>) {
        self.drain_probe = Some(probe);
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn shared_barrier_hits(&self) -> u64 {
        self.shared_hits
    }

    pub fn external_barrier_hits(&self) -> u64 {
        self.external_hits
    }

    pub fn live_entity_count(&self) -> usize {
        self.entity_workers.len()
    }

    pub fn worker_of(&self, entity: EntityId) -> Option<WorkerId> {
        self.entity_workers.get(&entity).copied()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ── Population ────────────────────────────────────────────────────────

    /// Queue an entity to start when its `start_ms` comes up.
    pub fn schedule_entity(&mut self, entity: Box<dyn Entity>) {
        self.pending.push_entity(entity);
    }

    /// Queue an event for delivery at `at_ms`.
    pub fn schedule_event(&mut self, at_ms: u64, event: ScheduledEvent) {
        self.pending.push_event(at_ms, event);
    }

    /// Assign an entity to a worker before the run starts (confluxes and
    /// other permanent aggregates).
    pub fn seed_entity(&mut self, entity: Box<dyn Entity>, worker: Option<WorkerId>) {
        assert!(!self.started, "seed entities before start_all");
        let target = worker.unwrap_or_else(|| self.round_robin());
        self.place(entity, target);
    }

    /// Thread-safe removal request used by workers; the entity disappears
    /// from the global list at the next staging window.
    pub fn removal_list(&self) -> Arc<Mutex<Vec<EntityId>>> {
        Arc::clone(&self.removal)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    /// Stage frame-0 arrivals and launch all worker threads.
    pub fn start_all(&mut self) -> StageReport {
        assert!(!self.workers.is_empty(), "init_workers must run before start_all");
        assert!(!self.started, "start_all called twice");
        self.started = true;
        self.next_frame_to_stage = 0;
        self.tick_offset = self.tick_step;

        let mut report = StageReport { advanced: true, ..Default::default() };
        self.stage_entities(&mut report);

        let action = Arc::clone(self.action.as_ref().expect("init_workers ran"));
        let all_inboxes: Vec<Arc<WorkerInbox>> =
            self.workers.iter().map(|w| Arc::clone(&w.inbox)).collect();
        for w in &mut self.workers {
            let setup = WorkerSetup {
                id: w.id,
                inbox: Arc::clone(&w.inbox),
                all_inboxes: all_inboxes.clone(),
                agent_count: Arc::clone(&w.agent_count),
                shared: Arc::clone(&self.shared),
                external: Arc::clone(&self.external),
                stop: Arc::clone(&self.stop),
                latch: Arc::clone(&self.latch),
                bus: Arc::clone(&self.bus),
                removal: Arc::clone(&self.removal),
                action: Arc::clone(&action),
                base_gran_ms: self.base_gran_ms,
                tick_step: self.tick_step,
                aura_active: self.aura_active,
            };
            let name = format!("mts-worker-{}", w.id.0);
            w.join = Some(
                std::thread::Builder::new()
                    .name(name)
                    .spawn(move || run_worker(setup))
                    .expect("spawn worker thread"),
            );
        }
        debug!(workers = self.size, "work group started");
        report
    }

    /// The main thread's once-per-base-tick synchronisation point.
    ///
    /// Honours the tick stride, meets the workers at the shared barrier,
    /// stages due entities and events, drains removals, decides whether this
    /// cycle is the last, and releases the workers at the external barrier.
    pub fn wait(&mut self) -> StageReport {
        assert!(self.started, "wait called before start_all");
        let mut report = StageReport::default();
        self.tick_offset -= 1;
        if self.tick_offset > 0 {
            return report;
        }
        self.tick_offset = self.tick_step;
        report.advanced = true;

        self.shared.wait();
        self.shared_hits += 1;

        self.next_frame_to_stage += self.tick_step as u64;
        self.stage_entities(&mut report);
        self.route_messages();
        self.drain_removals(&mut report);

        if self.should_stop() {
            report.stopping = true;
            self.stop.store(true, Ordering::Release);
        }

        self.external.wait();
        self.external_hits += 1;
        report
    }

    /// The aura phase's second external-barrier hit.  Only meaningful when
    /// the group was built with `aura_active`.
    pub fn wait_extern_again(&mut self) {
        assert!(self.aura_active, "wait_extern_again requires an active aura manager");
        self.external.wait();
        self.external_hits += 1;
    }

    /// Force the stop flag (abort path).  The caller must still drive one
    /// full barrier cycle so workers observe it; `join_all` does both.
    pub fn interrupt(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Drive the barriers until the workers exit, then join them.
    ///
    /// On the normal path (`wait` returned `stopping`) the workers are
    /// already past their last cycle and this only joins.  On the abort path
    /// one extra barrier cycle releases them.
    pub fn join_all(&mut self, extra_cycle: bool) {
        if extra_cycle {
            self.stop.store(true, Ordering::Release);
            self.shared.wait();
            self.shared_hits += 1;
            self.external.wait();
            self.external_hits += 1;
            if self.aura_active {
                self.external.wait();
                self.external_hits += 1;
            }
        }
        for w in &mut self.workers {
            if let Some(handle) = w.join.take()
                && handle.join().is_err()
            {
                self.latch
                    .raise(KernelFault::WorkerPanic(format!("worker {} died", w.id)));
            }
        }
        debug!("work group joined");
    }

    // ── Migration ─────────────────────────────────────────────────────────

    /// Move `entity` to `target` between ticks.
    ///
    /// The source worker removes it at the top of its next cycle and pushes
    /// it into the target's inbox; the target adopts it in the same cycle.
    pub fn migrate(&mut self, entity: EntityId, target: WorkerId) {
        let Some(&current) = self.entity_workers.get(&entity) else {
            warn!(entity = %entity, "migration requested for unknown entity");
            return;
        };
        if current == target {
            return;
        }
        self.workers[current.index()].inbox.lock().migrate_out.push((entity, target));
        self.entity_workers.insert(entity, target);
    }

    /// The worker currently holding the fewest entities.
    pub fn least_loaded_worker(&self) -> WorkerId {
        self.workers
            .iter()
            .min_by_key(|w| w.agent_count.load(Ordering::Relaxed))
            .map(|w| w.id)
            .expect("group has workers")
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn round_robin(&mut self) -> WorkerId {
        let id = WorkerId(self.next_worker as u32);
        self.next_worker = (self.next_worker + 1) % self.size;
        id
    }

    fn place(&mut self, mut entity: Box<dyn Entity>, worker: WorkerId) {
        let ent_id = entity.id();
        if self.entity_workers.insert(ent_id, worker).is_some() {
            // The same entity reached assignment twice: a work-group bug.
            self.latch.raise(KernelFault::MigrationRace(ent_id));
            return;
        }
        entity.set_current_worker(Some(worker));
        self.workers[worker.index()].inbox.lock().to_add.push(entity);
    }

    /// Release every pending item due at the staging frame.
    fn stage_entities(&mut self, report: &mut StageReport) {
        let due_ms = self.next_frame_to_stage * self.base_gran_ms as u64;
        while let Some(item) = self.pending.pop_due(due_ms) {
            match item {
                PendingItem::EntityStart(entity) => {
                    report.staged += 1;
                    match self.loader.route(entity) {
                        LoadDecision::Assign(e) => {
                            let target = self.round_robin();
                            self.place(e, target);
                        }
                        LoadDecision::AssignLeastLoaded(e) => {
                            let target = self.least_loaded_worker();
                            self.place(e, target);
                        }
                        LoadDecision::Absorbed => {}
                    }
                }
                PendingItem::Event(event) => self.deliver_event(event),
            }
        }
    }

    fn deliver_event(&mut self, event: ScheduledEvent) {
        match self.entity_workers.get(&event.to) {
            Some(&worker) => {
                self.workers[worker.index()].inbox.lock().messages.push(
                    mts_entity::Envelope { to: event.to, from: event.from, msg: event.msg },
                );
            }
            None => {
                debug!(to = %event.to, "dropping event for an entity not on any worker");
            }
        }
    }

    /// Route next-tick bus envelopes to the owning workers.
    fn route_messages(&mut self) {
        for env in self.bus.drain_scheduled() {
            match self.entity_workers.get(&env.to) {
                Some(&worker) => {
                    self.workers[worker.index()].inbox.lock().messages.push(env);
                }
                None => {
                    // Retired recipients are normal; nothing to deliver to.
                    debug!(to = %env.to, "dropping message for retired entity");
                }
            }
        }
    }

    fn drain_removals(&mut self, report: &mut StageReport) {
        let drained: Vec<EntityId> =
            std::mem::take(&mut *self.removal.lock().expect("removal list poisoned"));
        for ent_id in drained {
            if self.entity_workers.remove(&ent_id).is_some() {
                report.removed += 1;
            }
        }
    }

    fn should_stop(&self) -> bool {
        if self.end_tick > 0 {
            return self.next_frame_to_stage >= self.end_tick;
        }
        // end_tick == 0: run until drained.
        if !self.pending.is_empty() {
            return false;
        }
        match &self.drain_probe {
            Some(probe) => probe(),
            None => self.entity_workers.is_empty(),
        }
    }
}
