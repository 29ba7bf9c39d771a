//! `mts-net` — the static road network and the dynamic aura index.
//!
//! # Crate layout
//!
//! | Module      | Contents                                                   |
//! |-------------|------------------------------------------------------------|
//! | [`network`] | `RoadNetwork` (nodes/links/segments/lanes/connectors), `RoadNetworkBuilder` |
//! | [`path`]    | BFS link-path derivation for trip construction             |
//! | [`aura`]    | `AuraManager` — R-tree over agent positions                |
//! | [`error`]   | `NetError`, `NetResult<T>`                                 |
//!
//! The network is supplied once at init and immutable for the run; loading it
//! from a database or XML is a collaborator's job.  The aura index is the one
//! mutable structure here, and it only mutates between the two external
//! barriers of a tick.

pub mod aura;
pub mod error;
pub mod network;
pub mod path;

#[cfg(test)]
mod tests;

pub use aura::AuraManager;
pub use error::{NetError, NetResult};
pub use network::{
    BusStop, Lane, LaneConnector, Link, Node, RoadNetwork, RoadNetworkBuilder, RoadSegment,
    VEHICLE_FOOTPRINT_CM,
};
pub use path::{link_path, segment_path};
