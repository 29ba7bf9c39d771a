//! Transit facets: bus drivers, passengers, and persons waiting at stops.
//!
//! Boarding and alighting are mediated by the conflux's bus-stop step: the
//! facets here only expose the state that step needs (`at_stop`, passenger
//! list, waiting stop).  Boarding decision trees are collaborator territory.

use mts_core::{BusStopId, NodeId, SegmentId};
use mts_net::RoadNetwork;

use crate::driver::{DriveStep, drive_along, resync_cursor};
use crate::person::{Person, PersonCore};
use crate::role::{BehaviorFacet, MoveContext, MoveOutcome, MovementFacet, RoleKind};

/// Default passenger capacity of a bus.
pub const BUS_CAPACITY: usize = 40;

/// How long a bus dwells at a stop, in multiples of the tick length.
pub const DWELL_TICKS: u64 = 1;

// ── Bus driver ────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct BusDriverBehavior {
    /// Speed factor; buses run slightly under the limit.
    speed_factor: f64,
}

impl BusDriverBehavior {
    pub fn target_speed(&self, seg_max_mps: f64) -> f64 {
        let factor = if self.speed_factor > 0.0 { self.speed_factor } else { 0.9 };
        (seg_max_mps * factor).max(0.5)
    }
}

impl BehaviorFacet for BusDriverBehavior {
    fn kind(&self) -> RoleKind {
        RoleKind::BusDriver
    }
}

/// One stop of a bus route, resolved to path coordinates.
struct ServedStop {
    stop: BusStopId,
    segment: SegmentId,
    /// Distance from the stop to the segment's downstream end.
    dist_from_end_cm: i64,
}

/// Drives the route and dwells at served stops; carries passengers.
pub struct BusDriverMovement {
    path: Vec<SegmentId>,
    cursor: usize,
    serve: Vec<ServedStop>,
    next_serve: usize,
    /// Persons currently on board.
    pub passengers: Vec<Box<Person>>,
    pub capacity: usize,
    /// Set while dwelling at a stop; the conflux's bus-stop step boards and
    /// alights during this window.
    pub at_stop: Option<BusStopId>,
    pub dwell_until_ms: u64,
}

impl BusDriverMovement {
    pub fn new(path: Vec<SegmentId>, serve_stops: Vec<BusStopId>, network: &RoadNetwork) -> Self {
        let serve = serve_stops
            .into_iter()
            .map(|id| {
                let stop = network.bus_stop(id);
                let seg = network.segment(stop.segment);
                ServedStop {
                    stop: id,
                    segment: stop.segment,
                    dist_from_end_cm: seg.length_cm - stop.offset_cm,
                }
            })
            .collect();
        Self {
            path,
            cursor: 0,
            serve,
            next_serve: 0,
            passengers: Vec::new(),
            capacity: BUS_CAPACITY,
            at_stop: None,
            dwell_until_ms: 0,
        }
    }

    pub fn has_spare_capacity(&self) -> bool {
        self.passengers.len() < self.capacity
    }

    /// Still dwelling at `now_ms`?
    pub fn is_dwelling(&self, now_ms: u64) -> bool {
        self.at_stop.is_some() && now_ms < self.dwell_until_ms
    }
}

impl MovementFacet for BusDriverMovement {
    type Behavior = BusDriverBehavior;

    fn frame_init(
        &mut self,
        _behavior: &mut BusDriverBehavior,
        core: &mut PersonCore,
        ctx: &mut MoveContext<'_>,
    ) {
        if let Some(pos) = self.path.iter().position(|s| *s == core.segment) {
            self.cursor = pos;
        } else {
            self.cursor = 0;
            core.segment = self.path[0];
            core.distance_to_seg_end_cm = ctx.network.segment(self.path[0]).length_cm;
        }
        core.seg_entry_ms = ctx.now.ms;
        core.link_entry_ms = ctx.now.ms;
        let pos = core.live_position(ctx.network);
        core.publish_position(pos, 0.0);
    }

    fn frame_tick(
        &mut self,
        behavior: &mut BusDriverBehavior,
        core: &mut PersonCore,
        ctx: &mut MoveContext<'_>,
    ) -> MoveOutcome {
        // Dwell window: hold position, let the bus-stop step work.
        if let Some(_stop) = self.at_stop {
            if ctx.now.ms < self.dwell_until_ms {
                core.remaining_ms = 0;
                return MoveOutcome::Stay;
            }
            self.at_stop = None;
        }

        resync_cursor(&self.path, &mut self.cursor, core.segment);
        let speed = behavior.target_speed(ctx.network.segment(core.segment).max_speed_mps);

        let serve = &self.serve;
        let next_serve = self.next_serve;
        let step = drive_along(
            &self.path,
            &mut self.cursor,
            speed,
            core,
            ctx,
            |segment, dist_to_end| {
                let candidate = serve.get(next_serve)?;
                if candidate.segment == segment && candidate.dist_from_end_cm < dist_to_end {
                    Some((candidate.stop, candidate.dist_from_end_cm))
                } else {
                    None
                }
            },
        );

        let pos = core.live_position(ctx.network);
        core.publish_position(pos, if core.is_queuing { 0.0 } else { speed });

        match step {
            DriveStep::PausedAtStop(stop) => {
                self.next_serve += 1;
                self.at_stop = Some(stop);
                self.dwell_until_ms = ctx.now.ms + DWELL_TICKS * ctx.base_gran_ms as u64;
                MoveOutcome::Stay
            }
            DriveStep::Stay => MoveOutcome::Stay,
            DriveStep::EnteredNextLink => MoveOutcome::EnteredNextLink,
            DriveStep::Completed => MoveOutcome::Completed,
        }
    }

    fn describe(&self, core: &PersonCore) -> String {
        format!(
            "seg={} pax={}{}",
            core.segment.0,
            self.passengers.len(),
            match self.at_stop {
                Some(stop) => format!(" at stop {}", stop.0),
                None => String::new(),
            }
        )
    }
}

// ── Passenger ─────────────────────────────────────────────────────────────────

pub struct PassengerBehavior;

impl BehaviorFacet for PassengerBehavior {
    fn kind(&self) -> RoleKind {
        RoleKind::Passenger
    }
}

enum Ride {
    /// On a bus; `alight == None` rides to the end of the route.
    Bus { alight: Option<BusStopId> },
    /// On rail: a timed teleport to `dest`.
    Mrt { dest: NodeId, ride_ms: u64, arrive_ms: Option<u64> },
}

/// Rides a vehicle; the vehicle (or the clock, for rail) decides arrival.
pub struct PassengerMovement {
    ride: Ride,
}

impl PassengerMovement {
    /// Passenger riding a bus until `alight` (route end when `None`).
    pub fn bus(alight: Option<BusStopId>) -> Self {
        Self { ride: Ride::Bus { alight } }
    }

    /// Rail rider teleporting to `dest` after `ride_ms`.
    pub fn mrt(dest: NodeId, ride_ms: u64) -> Self {
        Self { ride: Ride::Mrt { dest, ride_ms, arrive_ms: None } }
    }

    /// The stop this bus passenger wants to alight at, if on a bus.
    pub fn alight_stop(&self) -> Option<BusStopId> {
        match &self.ride {
            Ride::Bus { alight } => *alight,
            Ride::Mrt { .. } => None,
        }
    }

    /// `true` for bus riders (as opposed to rail).
    pub fn on_bus(&self) -> bool {
        matches!(self.ride, Ride::Bus { .. })
    }
}

impl MovementFacet for PassengerMovement {
    type Behavior = PassengerBehavior;

    fn frame_init(
        &mut self,
        _behavior: &mut PassengerBehavior,
        core: &mut PersonCore,
        ctx: &mut MoveContext<'_>,
    ) {
        if let Ride::Mrt { ride_ms, arrive_ms, .. } = &mut self.ride {
            *arrive_ms = Some(ctx.now.ms + *ride_ms);
        }
        core.publish_position(core.walk_pos, 0.0);
    }

    fn frame_tick(
        &mut self,
        _behavior: &mut PassengerBehavior,
        core: &mut PersonCore,
        ctx: &mut MoveContext<'_>,
    ) -> MoveOutcome {
        core.remaining_ms = 0;
        match &self.ride {
            // Bus passengers are passive: the conflux's bus-stop step alights
            // them when their stop is served.
            Ride::Bus { .. } => MoveOutcome::Stay,
            Ride::Mrt { dest, arrive_ms, .. } => {
                match arrive_ms {
                    Some(arrive) if ctx.now.ms >= *arrive => {
                        core.walk_pos = ctx.network.node(*dest).location;
                        core.publish_position(core.walk_pos, 0.0);
                        MoveOutcome::Completed
                    }
                    _ => MoveOutcome::Stay,
                }
            }
        }
    }

    fn describe(&self, _core: &PersonCore) -> String {
        match &self.ride {
            Ride::Bus { alight: Some(stop) } => format!("on bus until stop {}", stop.0),
            Ride::Bus { alight: None } => "on bus to route end".to_string(),
            Ride::Mrt { .. } => "on mrt".to_string(),
        }
    }
}

// ── Waiting at a stop ─────────────────────────────────────────────────────────

pub struct WaitingBehavior;

impl BehaviorFacet for WaitingBehavior {
    fn kind(&self) -> RoleKind {
        RoleKind::WaitBusActivity
    }
}

/// Waits at `stop` for a bus with spare capacity.
pub struct WaitingMovement {
    pub stop: BusStopId,
    /// Carried through to the passenger role at boarding time.
    pub alight_stop: Option<BusStopId>,
    pub waited_ms: u64,
}

impl WaitingMovement {
    pub fn new(stop: BusStopId, alight_stop: Option<BusStopId>) -> Self {
        Self { stop, alight_stop, waited_ms: 0 }
    }
}

impl MovementFacet for WaitingMovement {
    type Behavior = WaitingBehavior;

    fn frame_init(
        &mut self,
        _behavior: &mut WaitingBehavior,
        core: &mut PersonCore,
        ctx: &mut MoveContext<'_>,
    ) {
        // Stand at the stop's position.
        if self.stop.index() < ctx.network.bus_stop_count() {
            let stop = ctx.network.bus_stop(self.stop);
            core.walk_pos = ctx.network.position_on_segment(stop.segment, stop.offset_cm);
        }
        core.publish_position(core.walk_pos, 0.0);
    }

    fn frame_tick(
        &mut self,
        _behavior: &mut WaitingBehavior,
        core: &mut PersonCore,
        _ctx: &mut MoveContext<'_>,
    ) -> MoveOutcome {
        self.waited_ms += core.remaining_ms;
        core.remaining_ms = 0;
        MoveOutcome::Stay
    }

    fn describe(&self, _core: &PersonCore) -> String {
        format!("waiting at stop {} for {}ms", self.stop.0, self.waited_ms)
    }
}
