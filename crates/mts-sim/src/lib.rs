//! `mts-sim` — wiring and the main-thread drive loop.
//!
//! [`SimBuilder`] turns a validated [`SimConfig`], a road network, and a
//! population of [`PersonSpec`]s into a runnable [`Simulation`]: one conflux
//! per intersection, partitioned across a work group; a loader that routes
//! staged persons into their starting conflux; the aura manager; and an
//! output writer fed from the collection hub.
//!
//! [`Simulation::run`] drives the barrier protocol tick by tick, checks the
//! error latch after every barrier, rebuilds the aura index in its dedicated
//! phase, and returns a [`SimSummary`] (or the latched fault).
//!
//! | Module       | Contents                                          |
//! |--------------|---------------------------------------------------|
//! | [`builder`]  | `SimBuilder`, `PersonSpec`, `TripSpec`            |
//! | [`sim`]      | `Simulation`, `SimSummary`                        |
//! | [`observer`] | `SimObserver`, `NoopObserver`                     |
//! | [`error`]    | `SimError`, `SimResult<T>`                        |

pub mod builder;
pub mod error;
pub mod observer;
pub mod sim;

#[cfg(test)]
mod tests;

pub use builder::{PersonSpec, SimBuilder, TripSpec};
pub use error::{SimError, SimResult};
pub use observer::{NoopObserver, SimObserver};
pub use sim::{SimSummary, Simulation, exit_code};
