//! `mts-entity` — the tickable-unit contract of the kernel.
//!
//! | Module      | Contents                                                  |
//! |-------------|-----------------------------------------------------------|
//! | [`entity`]  | `Entity` trait, `UpdateStatus`, `TickContext`             |
//! | [`pending`] | `PendingQueue` — unified start-time queue over entities and events |
//! | [`bus`]     | `MessageBus`, `Message`, `Envelope`                       |
//! | [`latch`]   | `ErrorLatch`, `KernelFault`, `PopulationCensus`           |
//!
//! Everything here is worker-agnostic: `mts-workers` owns the threads and
//! barriers, this crate defines what a worker runs and how entities talk.

pub mod bus;
pub mod entity;
pub mod latch;
pub mod pending;

#[cfg(test)]
mod tests;

pub use bus::{BusError, Envelope, Message, MessageBus};
pub use entity::{Entity, TickContext, UpdateState, UpdateStatus};
pub use latch::{ErrorLatch, KernelFault, PopulationCensus};
pub use pending::{PendingItem, PendingQueue, ScheduledEvent};
