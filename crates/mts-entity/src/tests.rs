//! Unit tests for mts-entity.

use std::any::Any;

use mts_core::{EntityId, SegmentId, Timeslice, WorkerId};

use crate::{
    Entity, Envelope, ErrorLatch, KernelFault, Message, MessageBus, PendingItem, PendingQueue,
    PopulationCensus, ScheduledEvent, TickContext, UpdateStatus,
};

// ── Test double ───────────────────────────────────────────────────────────────

struct Stub {
    id: EntityId,
    start_ms: u64,
    worker: Option<WorkerId>,
    ticks: u32,
}

impl Stub {
    fn new(id: u64, start_ms: u64) -> Self {
        Self { id: EntityId(id), start_ms, worker: None, ticks: 0 }
    }
}

impl Entity for Stub {
    fn id(&self) -> EntityId {
        self.id
    }

    fn start_ms(&self) -> u64 {
        self.start_ms
    }

    fn current_worker(&self) -> Option<WorkerId> {
        self.worker
    }

    fn set_current_worker(&mut self, worker: Option<WorkerId>) {
        self.worker = worker;
    }

    fn frame_tick(&mut self, _ctx: &mut TickContext<'_>) -> UpdateStatus {
        self.ticks += 1;
        UpdateStatus::proceed()
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

// ── PendingQueue ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod pending {
    use super::*;

    #[test]
    fn pops_in_start_time_order() {
        let mut q = PendingQueue::new();
        q.push_entity(Box::new(Stub::new(1, 300)));
        q.push_entity(Box::new(Stub::new(2, 100)));
        q.push_entity(Box::new(Stub::new(3, 200)));

        let mut order = Vec::new();
        while let Some(PendingItem::EntityStart(e)) = q.pop_due(u64::MAX) {
            order.push(e.start_ms());
        }
        assert_eq!(order, vec![100, 200, 300]);
    }

    #[test]
    fn ties_break_by_entity_id() {
        let mut q = PendingQueue::new();
        q.push_entity(Box::new(Stub::new(9, 100)));
        q.push_entity(Box::new(Stub::new(4, 100)));
        q.push_entity(Box::new(Stub::new(7, 100)));

        let mut ids = Vec::new();
        while let Some(PendingItem::EntityStart(e)) = q.pop_due(u64::MAX) {
            ids.push(e.id().0);
        }
        assert_eq!(ids, vec![4, 7, 9]);
    }

    #[test]
    fn pop_due_respects_now() {
        let mut q = PendingQueue::new();
        q.push_entity(Box::new(Stub::new(1, 500)));
        assert!(q.pop_due(499).is_none());
        assert_eq!(q.peek_time(), Some(500));
        assert!(q.pop_due(500).is_some());
        assert!(q.is_empty());
    }

    #[test]
    fn events_and_entities_interleave_by_time() {
        let mut q = PendingQueue::new();
        q.push_entity(Box::new(Stub::new(1, 200)));
        q.push_event(
            100,
            ScheduledEvent { to: EntityId(1), from: None, msg: Message::WakeUp },
        );

        assert!(matches!(q.pop_due(u64::MAX), Some(PendingItem::Event(_))));
        assert!(matches!(q.pop_due(u64::MAX), Some(PendingItem::EntityStart(_))));
    }

    #[test]
    fn events_at_same_time_keep_push_order() {
        let mut q = PendingQueue::new();
        for kind in 0..3u32 {
            q.push_event(
                100,
                ScheduledEvent {
                    to: EntityId(0),
                    from: None,
                    msg: Message::Custom { kind, payload: vec![] },
                },
            );
        }
        let mut kinds = Vec::new();
        while let Some(PendingItem::Event(ev)) = q.pop_due(u64::MAX) {
            if let Message::Custom { kind, .. } = ev.msg {
                kinds.push(kind);
            }
        }
        assert_eq!(kinds, vec![0, 1, 2]);
    }
}

// ── MessageBus ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod bus {
    use super::*;

    #[test]
    fn scheduled_envelopes_drain_once() {
        let bus = MessageBus::new();
        bus.schedule(Envelope { to: EntityId(1), from: None, msg: Message::WakeUp });
        bus.schedule(Envelope { to: EntityId(2), from: None, msg: Message::WakeUp });

        assert_eq!(bus.pending_count(), 2);
        assert_eq!(bus.drain_scheduled().len(), 2);
        assert!(bus.drain_scheduled().is_empty());
    }

    #[test]
    fn publish_fans_out_to_subscribers() {
        let bus = MessageBus::new();
        bus.subscribe(7, EntityId(10));
        bus.subscribe(7, EntityId(11));
        bus.subscribe(8, EntityId(12)); // different event

        bus.publish_event(7, EntityId(1), Message::WakeUp);
        let delivered = bus.drain_scheduled();
        let mut to: Vec<u64> = delivered.iter().map(|e| e.to.0).collect();
        to.sort_unstable();
        assert_eq!(to, vec![10, 11]);
        assert!(delivered.iter().all(|e| e.from == Some(EntityId(1))));
    }

    #[test]
    fn duplicate_subscription_delivers_once() {
        let bus = MessageBus::new();
        bus.subscribe(7, EntityId(10));
        bus.subscribe(7, EntityId(10));
        bus.publish_event(7, EntityId(1), Message::WakeUp);
        assert_eq!(bus.drain_scheduled().len(), 1);
    }

    #[test]
    fn unsubscribe_all_stops_delivery() {
        let bus = MessageBus::new();
        bus.subscribe(7, EntityId(10));
        bus.subscribe(8, EntityId(10));
        bus.unsubscribe_all(EntityId(10));
        bus.publish_event(7, EntityId(1), Message::WakeUp);
        bus.publish_event(8, EntityId(1), Message::WakeUp);
        assert!(bus.drain_scheduled().is_empty());
    }

    #[test]
    fn send_now_lands_in_the_immediate_list() {
        let bus = MessageBus::new();
        let latch = ErrorLatch::new();
        let mut immediate = Vec::new();
        let mut ctx = TickContext::new(
            Timeslice::new(3, 100),
            100,
            WorkerId(0),
            &bus,
            &latch,
            &mut immediate,
        );
        ctx.send_now(EntityId(5), EntityId(1), Message::WakeUp);

        assert_eq!(immediate.len(), 1);
        assert_eq!(immediate[0].to, EntityId(5));
        // Nothing leaked into the next-tick mailbox.
        assert_eq!(bus.pending_count(), 0);
    }
}

// ── ErrorLatch / census ───────────────────────────────────────────────────────

#[cfg(test)]
mod latch {
    use super::*;

    #[test]
    fn first_fault_wins() {
        let latch = ErrorLatch::new();
        assert!(!latch.is_raised());

        latch.raise(KernelFault::MigrationRace(EntityId(1)));
        latch.raise(KernelFault::UnownedSegment { segment: SegmentId(2) });

        assert!(latch.is_raised());
        assert_eq!(latch.fault(), Some(KernelFault::MigrationRace(EntityId(1))));
    }

    #[test]
    fn census_tracks_conservation() {
        let census = PopulationCensus::new();
        assert!(census.all_retired());

        census.note_created();
        census.note_created();
        assert_eq!(census.live(), 2);
        assert!(!census.all_retired());

        census.note_retired();
        census.note_retired();
        assert!(census.all_retired());
    }
}

// ── UpdateStatus ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod status {
    use super::*;
    use mts_buffer::Shared;
    use mts_core::MutexStrategy;

    #[test]
    fn builders_compose() {
        let cell = Shared::new(MutexStrategy::Buffered, 0i64);
        let status = UpdateStatus::done()
            .add_cell(cell.registration())
            .remove_cell(cell.id());
        assert!(status.is_done());
        assert_eq!(status.to_add.len(), 1);
        assert_eq!(status.to_remove, vec![cell.id()]);
    }
}
