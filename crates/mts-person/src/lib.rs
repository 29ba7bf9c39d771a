//! `mts-person` — the mobile population of the simulation.
//!
//! A [`Person`] is the canonical mobile entity: fixed origin and destination
//! nodes, a [`TripChain`] of sub-trips and activities, buffered position
//! cells, and a deterministic per-person RNG.  At any moment exactly one
//! [`Role`] is active; a role is a tagged variant carrying a `(behavior,
//! movement)` facet pair — behavior decides, movement mutates.
//!
//! | Module         | Contents                                              |
//! |----------------|-------------------------------------------------------|
//! | [`trip_chain`] | `TripChain`, `TripItem`, `SubTrip`, `TravelMode`      |
//! | [`role`]       | `Role`, `RoleKind`, facet traits, `MoveContext`       |
//! | [`driver`]     | Car driver facets and the shared vehicle advance loop |
//! | [`pedestrian`] | Walking facets                                        |
//! | [`transit`]    | Bus driver, passenger, and wait-at-stop facets        |
//! | [`activity`]   | Dwell-at-node facets                                  |
//! | [`person`]     | `PersonCore`, `Person`, the `Entity` impl             |
//!
//! The shipped movement models are deliberately plain kinematics; richer
//! behavioural models are collaborators that implement the same facet traits.

pub mod activity;
pub mod driver;
pub mod error;
pub mod pedestrian;
pub mod person;
pub mod role;
pub mod transit;
pub mod trip_chain;


pub use error::{PersonError, PersonResult};
pub use person::{Person, PersonCore, PersonProps, TripSwitch};
pub use role::{
    BehaviorFacet, MoveContext, MoveOutcome, MovementFacet, NoAdmission, Role, RoleKind,
    SegmentAdmission, SegmentCrossing,
};
pub use trip_chain::{SubTrip, TravelMode, TripChain, TripItem};
