//! `mts-conflux` — the intersection-centric spatial aggregator.
//!
//! A [`Conflux`] owns one intersection node and every road segment on the
//! links that terminate there.  It is itself an entity (it runs on a worker)
//! but behaves as an aggregate scheduler: each tick it orders the persons it
//! contains by urgency (closest to the intersection first), drives them
//! through their role's movement facet, and coordinates handoffs to
//! neighbouring confluxes through bounded virtual queues.
//!
//! | Module       | Contents                                               |
//! |--------------|--------------------------------------------------------|
//! | [`seg_stats`]| `SegmentStats`, `LaneStats`, `SupplyMap` (admission)   |
//! | [`merge`]    | the top-C merge                                        |
//! | [`bus_stop`] | `BusStopAgent`                                         |
//! | [`conflux`]  | `Conflux`, `ConfluxInbox`                              |

pub mod bus_stop;
pub mod conflux;
pub mod merge;
pub mod seg_stats;


pub use bus_stop::BusStopAgent;
pub use conflux::{Conflux, ConfluxDirectory, ConfluxInbox};
pub use merge::top_c_merge;
pub use seg_stats::{LaneStats, SegmentStats, SupplyMap};
