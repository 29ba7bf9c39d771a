//! Roles and the facet seam.
//!
//! A role is the currently active behaviour of a person.  Rather than a
//! class hierarchy with virtual dispatch on the hot path, [`Role`] is a
//! tagged variant whose payload is the `(behavior, movement)` facet pair for
//! that kind; dispatch is a match, and each pair is statically typed via
//! [`MovementFacet::Behavior`].
//!
//! The facet traits are the interface collaborators implement to plug richer
//! models in: the kernel only ever calls `frame_init` / `frame_tick` /
//! `describe` and interprets the returned [`MoveOutcome`].

use mts_core::{EntityId, LaneId, NodeId, SegmentId, Timeslice};
use mts_net::RoadNetwork;

use crate::activity::{ActivityBehavior, ActivityMovement};
use crate::driver::{DriverBehavior, DriverMovement};
use crate::error::{PersonError, PersonResult};
use crate::pedestrian::{PedestrianBehavior, PedestrianMovement};
use crate::person::PersonCore;
use crate::transit::{
    BusDriverBehavior, BusDriverMovement, PassengerBehavior, PassengerMovement, WaitingBehavior,
    WaitingMovement,
};
use crate::trip_chain::{TravelMode, TripItem};

// ── RoleKind ──────────────────────────────────────────────────────────────────

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum RoleKind {
    Driver,
    Pedestrian,
    BusDriver,
    Passenger,
    WaitBusActivity,
    Activity,
}

impl RoleKind {
    /// Tag written in trace records.
    pub fn tag(self) -> &'static str {
        match self {
            RoleKind::Driver => "Driver",
            RoleKind::Pedestrian => "Pedestrian",
            RoleKind::BusDriver => "BusDriver",
            RoleKind::Passenger => "Passenger",
            RoleKind::WaitBusActivity => "WaitBus",
            RoleKind::Activity => "Activity",
        }
    }

    /// Roles that occupy a lane and move under segment supply constraints.
    pub fn occupies_lane(self) -> bool {
        matches!(self, RoleKind::Driver | RoleKind::BusDriver)
    }
}

// ── Movement context ──────────────────────────────────────────────────────────

/// One segment exited during a movement tick, with entry/exit times for
/// travel-time accounting.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SegmentCrossing {
    pub segment: SegmentId,
    pub entered_ms: u64,
    pub exited_ms: u64,
}

/// What one movement tick may observe and consume.
///
/// `admission` is the supply interface of whichever conflux is driving the
/// update; `crossings` collects every segment the person exited this tick so
/// the conflux can account flow and travel times for intermediate hops.
pub struct MoveContext<'a> {
    pub now: Timeslice,
    pub base_gran_ms: u32,
    pub network: &'a RoadNetwork,
    pub admission: &'a dyn SegmentAdmission,
    pub crossings: Vec<SegmentCrossing>,
}

impl<'a> MoveContext<'a> {
    pub fn new(
        now: Timeslice,
        base_gran_ms: u32,
        network: &'a RoadNetwork,
        admission: &'a dyn SegmentAdmission,
    ) -> Self {
        Self { now, base_gran_ms, network, admission, crossings: Vec::new() }
    }
}

/// Supply-side queries movement code asks of the owning conflux.
///
/// Implementations use interior mutability for the consuming calls: movement
/// holds only a shared reference while the conflux iterates its own state.
pub trait SegmentAdmission {
    /// May one more vehicle enter `segment` right now (storage capacity)?
    fn can_accept(&self, segment: SegmentId) -> bool;

    /// Consume one unit of `lane`'s per-tick output flow.  Returns `false`
    /// (consuming nothing) when the lane has discharged its allowance.
    fn try_discharge(&self, lane: LaneId) -> bool;

    /// Physical lane a vehicle leaving lane infinity should join.
    fn pick_lane(&self, segment: SegmentId) -> u16;
}

/// Admission that never constrains — off-network ticking (standalone persons,
/// unit tests of movement arithmetic).
pub struct NoAdmission;

impl SegmentAdmission for NoAdmission {
    fn can_accept(&self, _segment: SegmentId) -> bool {
        true
    }

    fn try_discharge(&self, _lane: LaneId) -> bool {
        true
    }

    fn pick_lane(&self, _segment: SegmentId) -> u16 {
        0
    }
}

// ── Outcome ───────────────────────────────────────────────────────────────────

/// What a movement tick did, as seen by the conflux's housekeeping.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MoveOutcome {
    /// Still within the conflux (possibly on a different segment of the same
    /// link, possibly queuing).
    Stay,
    /// Crossed the intersection into the first segment of the path's next
    /// link — the destination conflux must admit or refuse.
    EnteredNextLink,
    /// The current trip item is finished.
    Completed,
}

// ── Facet traits ──────────────────────────────────────────────────────────────

/// The decision facet: picks speeds, lanes, dwell times.  Stateless models
/// are common; stateful ones carry their state here.
pub trait BehaviorFacet: Send {
    fn kind(&self) -> RoleKind;
}

/// The mutation facet: advances the person's placement each tick.
pub trait MovementFacet: Send {
    /// The behavior type this movement consults.  Pairing the facets at the
    /// type level keeps dispatch static inside the role variant.
    type Behavior: BehaviorFacet;

    /// One-time setup when the role becomes active.
    fn frame_init(
        &mut self,
        behavior: &mut Self::Behavior,
        core: &mut PersonCore,
        ctx: &mut MoveContext<'_>,
    );

    /// Advance one tick.
    fn frame_tick(
        &mut self,
        behavior: &mut Self::Behavior,
        core: &mut PersonCore,
        ctx: &mut MoveContext<'_>,
    ) -> MoveOutcome;

    /// Role-specific suffix for the person's trace record.
    fn describe(&self, _core: &PersonCore) -> String {
        String::new()
    }
}

// ── Role ──────────────────────────────────────────────────────────────────────

/// The active role: a tagged variant of facet pairs.
pub enum Role {
    Driver { behavior: DriverBehavior, movement: DriverMovement },
    Pedestrian { behavior: PedestrianBehavior, movement: PedestrianMovement },
    BusDriver { behavior: BusDriverBehavior, movement: BusDriverMovement },
    Passenger { behavior: PassengerBehavior, movement: PassengerMovement },
    WaitBusActivity { behavior: WaitingBehavior, movement: WaitingMovement },
    Activity { behavior: ActivityBehavior, movement: ActivityMovement },
}

impl Role {
    /// Instantiate the role for one trip item.
    ///
    /// `core` supplies the person's RNG for stochastic parameters (walk
    /// speed, driver speed factor) so construction stays deterministic per
    /// `(run_seed, entity_id)`.
    pub fn for_item(
        item: &TripItem,
        person: EntityId,
        core: &mut PersonCore,
        network: &RoadNetwork,
    ) -> PersonResult<Role> {
        match item {
            TripItem::Activity { at, duration_ms } => Ok(Role::Activity {
                behavior: ActivityBehavior,
                movement: ActivityMovement::new(*at, *duration_ms),
            }),
            TripItem::Trip(trip) => match trip.mode {
                TravelMode::Car => {
                    if trip.segment_path.is_empty() {
                        return Err(PersonError::MissingPath {
                            person,
                            from: trip.origin,
                            to: trip.destination,
                        });
                    }
                    Ok(Role::Driver {
                        behavior: DriverBehavior::draw(&mut core.rng),
                        movement: DriverMovement::new(trip.segment_path.clone()),
                    })
                }
                TravelMode::BusService => {
                    if trip.segment_path.is_empty() {
                        return Err(PersonError::MissingPath {
                            person,
                            from: trip.origin,
                            to: trip.destination,
                        });
                    }
                    Ok(Role::BusDriver {
                        behavior: BusDriverBehavior::default(),
                        movement: BusDriverMovement::new(
                            trip.segment_path.clone(),
                            trip.serve_stops.clone(),
                            network,
                        ),
                    })
                }
                TravelMode::Bus => {
                    let stop = trip
                        .board_stop
                        .ok_or(PersonError::MissingBoardStop { person })?;
                    Ok(Role::WaitBusActivity {
                        behavior: WaitingBehavior,
                        movement: WaitingMovement::new(stop, trip.alight_stop),
                    })
                }
                TravelMode::Walk => {
                    if trip.origin.index() >= network.node_count()
                        || trip.destination.index() >= network.node_count()
                    {
                        return Err(PersonError::MissingPath {
                            person,
                            from: trip.origin,
                            to: trip.destination,
                        });
                    }
                    let start = network.node(trip.origin).location;
                    let dest = network.node(trip.destination).location;
                    let speed = trip
                        .walk_speed_mps
                        .unwrap_or_else(|| core.rng.gen_range(0.9..1.4));
                    Ok(Role::Pedestrian {
                        behavior: PedestrianBehavior,
                        movement: PedestrianMovement::new(start, dest, speed),
                    })
                }
                TravelMode::Mrt => {
                    if trip.destination.index() >= network.node_count() {
                        return Err(PersonError::MissingPath {
                            person,
                            from: trip.origin,
                            to: trip.destination,
                        });
                    }
                    Ok(Role::Passenger {
                        behavior: PassengerBehavior,
                        movement: PassengerMovement::mrt(trip.destination, trip.ride_ms),
                    })
                }
            },
        }
    }

    pub fn kind(&self) -> RoleKind {
        match self {
            Role::Driver { .. } => RoleKind::Driver,
            Role::Pedestrian { .. } => RoleKind::Pedestrian,
            Role::BusDriver { .. } => RoleKind::BusDriver,
            Role::Passenger { .. } => RoleKind::Passenger,
            Role::WaitBusActivity { .. } => RoleKind::WaitBusActivity,
            Role::Activity { .. } => RoleKind::Activity,
        }
    }

    pub fn frame_init(&mut self, core: &mut PersonCore, ctx: &mut MoveContext<'_>) {
        match self {
            Role::Driver { behavior, movement } => movement.frame_init(behavior, core, ctx),
            Role::Pedestrian { behavior, movement } => movement.frame_init(behavior, core, ctx),
            Role::BusDriver { behavior, movement } => movement.frame_init(behavior, core, ctx),
            Role::Passenger { behavior, movement } => movement.frame_init(behavior, core, ctx),
            Role::WaitBusActivity { behavior, movement } => {
                movement.frame_init(behavior, core, ctx)
            }
            Role::Activity { behavior, movement } => movement.frame_init(behavior, core, ctx),
        }
    }

    pub fn frame_tick(&mut self, core: &mut PersonCore, ctx: &mut MoveContext<'_>) -> MoveOutcome {
        match self {
            Role::Driver { behavior, movement } => movement.frame_tick(behavior, core, ctx),
            Role::Pedestrian { behavior, movement } => movement.frame_tick(behavior, core, ctx),
            Role::BusDriver { behavior, movement } => movement.frame_tick(behavior, core, ctx),
            Role::Passenger { behavior, movement } => movement.frame_tick(behavior, core, ctx),
            Role::WaitBusActivity { behavior, movement } => {
                movement.frame_tick(behavior, core, ctx)
            }
            Role::Activity { behavior, movement } => movement.frame_tick(behavior, core, ctx),
        }
    }

    pub fn describe(&self, core: &PersonCore) -> String {
        match self {
            Role::Driver { movement, .. } => movement.describe(core),
            Role::Pedestrian { movement, .. } => movement.describe(core),
            Role::BusDriver { movement, .. } => movement.describe(core),
            Role::Passenger { movement, .. } => movement.describe(core),
            Role::WaitBusActivity { movement, .. } => movement.describe(core),
            Role::Activity { movement, .. } => movement.describe(core),
        }
    }

    /// The activity node for roles that dwell at one (`Activity` only).
    pub fn activity_node(&self) -> Option<NodeId> {
        match self {
            Role::Activity { movement, .. } => Some(movement.at),
            _ => None,
        }
    }
}
