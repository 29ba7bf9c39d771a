//! `mts-core` — foundational types for the `rust_mts` microsimulation kernel.
//!
//! This crate is a dependency of every other `mts-*` crate.  It intentionally
//! has no `mts-*` dependencies and minimal external ones (only `rand` and
//! `thiserror`, plus optional `serde`).
//!
//! # What lives here
//!
//! | Module      | Contents                                                  |
//! |-------------|-----------------------------------------------------------|
//! | [`ids`]     | `EntityId`, `NodeId`, `LinkId`, `SegmentId`, `LaneId`, …  |
//! | [`time`]    | `Timeslice`, `SimClock`                                   |
//! | [`units`]   | `Point` (integer centimetres), the one speed→distance conversion |
//! | [`rng`]     | `EntityRng` (per-entity), `RunRng` (run-level)            |
//! | [`config`]  | `SimConfig`, `MutexStrategy`                              |
//! | [`error`]   | `MtsError`, `MtsResult`                                   |
//!
//! # Feature flags
//!
//! | Flag    | Effect                                                      |
//! |---------|-------------------------------------------------------------|
//! | `serde` | Adds `Serialize`/`Deserialize` to all public value types.   |

pub mod config;
pub mod error;
pub mod ids;
pub mod rng;
pub mod time;
pub mod units;


// ── Re-exports ────────────────────────────────────────────────────────────────

pub use config::{MutexStrategy, SimConfig};
pub use error::{MtsError, MtsResult};
pub use ids::{
    BusStopId, CellId, ConfluxId, EntityId, EntityIdAllocator, LaneId, LinkId, NodeId, SegmentId,
    WorkerId,
};
pub use rng::{EntityRng, RunRng};
pub use time::{SimClock, Timeslice};
pub use units::{Point, centimetres_covered, seconds_to_cover};
