//! `mts-workers` — the tick scheduler and work-group runtime.
//!
//! One [`Worker`](worker) is one OS thread owning a subset of entities.  A
//! [`WorkGroup`] is a fleet of N workers plus the main thread, synchronised
//! by two barriers of arity N+1:
//!
//! ```text
//! workers: tick entities ──┤shared├── flip registries ──┤external├─ (aura) ─ loop
//! main:     (blocked)    ──┤shared├── stage / route / ──┤external├─ rebuild ─ loop
//!                                     drain removals
//! ```
//!
//! Everything a worker reads across threads during the update phase goes
//! through buffered cells; everything the main thread touches between the
//! barriers (inboxes, the pending queue, the removal list) is disjoint from
//! worker-owned state.  Suspension happens only at the barriers.
//!
//! | Module     | Contents                                             |
//! |------------|------------------------------------------------------|
//! | [`worker`] | `TickAction`, worker thread loop, inboxes            |
//! | [`group`]  | `WorkGroup`, `EntityLoader`, staging and migration   |

pub mod group;
pub mod worker;

#[cfg(test)]
mod tests;

pub use group::{EntityLoader, LoadDecision, StageReport, WorkGroup};
pub use worker::{EntityTickAction, TickAction};
