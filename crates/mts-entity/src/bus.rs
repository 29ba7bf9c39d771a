//! Point-in-time typed message delivery between entities.
//!
//! # Visibility rules
//!
//! - [`MessageBus::schedule`] / [`MessageBus::publish_event`]: envelopes
//!   accumulated during tick N are routed to the owning workers between the
//!   barriers and handled at the start of tick N+1.
//! - `TickContext::send_now`: delivered within tick N, but only to entities
//!   on the *same* worker — the worker drains the immediate list right after
//!   the sending entity's update returns.  A cross-worker recipient is a
//!   [`BusError::CrossThreadImmediate`], absorbed as a per-entity error.
//!
//! Handlers always run on the recipient's owning worker thread.

use std::sync::Mutex;

use rustc_hash::FxHashMap;
use thiserror::Error;

use mts_core::{EntityId, SegmentId};

// ── Message ───────────────────────────────────────────────────────────────────

/// Kernel message kinds.  Collaborator payloads travel as `Custom`.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Wake an idle entity (activity performers waiting out a timer).
    WakeUp,
    /// Drop every lane of `segment` to `flow_per_tick` vehicles/tick.
    InsertIncident { segment: SegmentId, flow_per_tick: f64 },
    /// Restore `segment`'s default lane flow rates.
    RemoveIncident { segment: SegmentId },
    /// An application-defined message.
    Custom { kind: u32, payload: Vec<u8> },
}

/// One addressed message.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub to: EntityId,
    pub from: Option<EntityId>,
    pub msg: Message,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    #[error("immediate delivery to {to} failed: recipient is not on worker {worker}")]
    CrossThreadImmediate { to: EntityId, worker: u32 },
}

// ── MessageBus ────────────────────────────────────────────────────────────────

/// The shared next-tick mailbox and the event subscription table.
///
/// Written concurrently by all workers during the tick; drained by the work
/// group between barriers.  A single coarse mutex is fine here — entities
/// message rarely compared to how often they move.
#[derive(Default)]
pub struct MessageBus {
    later: Mutex<Vec<Envelope>>,
    subscribers: Mutex<FxHashMap<u32, Vec<EntityId>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `envelope` for delivery at the start of the next tick.
    pub fn schedule(&self, envelope: Envelope) {
        self.later.lock().expect("bus lock poisoned").push(envelope);
    }

    /// Subscribe `who` to publications of `event`.
    pub fn subscribe(&self, event: u32, who: EntityId) {
        let mut subs = self.subscribers.lock().expect("bus lock poisoned");
        let list = subs.entry(event).or_default();
        if !list.contains(&who) {
            list.push(who);
        }
    }

    /// Drop `who`'s subscription to `event` (idempotent).
    pub fn unsubscribe(&self, event: u32, who: EntityId) {
        let mut subs = self.subscribers.lock().expect("bus lock poisoned");
        if let Some(list) = subs.get_mut(&event) {
            list.retain(|id| *id != who);
        }
    }

    /// Remove `who` from every subscription list (entity retirement).
    pub fn unsubscribe_all(&self, who: EntityId) {
        let mut subs = self.subscribers.lock().expect("bus lock poisoned");
        for list in subs.values_mut() {
            list.retain(|id| *id != who);
        }
    }

    /// Fan `msg` out to every subscriber of `event`; visible next tick.
    pub fn publish_event(&self, event: u32, from: EntityId, msg: Message) {
        let recipients: Vec<EntityId> = {
            let subs = self.subscribers.lock().expect("bus lock poisoned");
            subs.get(&event).cloned().unwrap_or_default()
        };
        let mut later = self.later.lock().expect("bus lock poisoned");
        later.extend(recipients.into_iter().map(|to| Envelope {
            to,
            from: Some(from),
            msg: msg.clone(),
        }));
    }

    /// Take every envelope queued so far.  Called by the work group between
    /// barriers to route deliveries to the owning workers.
    pub fn drain_scheduled(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.later.lock().expect("bus lock poisoned"))
    }

    /// Number of envelopes waiting for routing.
    pub fn pending_count(&self) -> usize {
        self.later.lock().expect("bus lock poisoned").len()
    }
}
