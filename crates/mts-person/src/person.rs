//! `PersonCore`, `Person`, and the standalone `Entity` impl.

use std::any::Any;
use std::sync::{Arc, OnceLock};

use tracing::warn;

use mts_buffer::{CellRegistration, Shared};
use mts_core::{
    CellId, EntityId, EntityRng, LaneId, MutexStrategy, NodeId, Point, SegmentId, WorkerId,
};
use mts_entity::{Entity, PopulationCensus, TickContext, UpdateStatus};
use mts_net::{RoadNetwork, RoadNetworkBuilder};

use crate::error::{PersonError, PersonResult};
use crate::role::{MoveContext, MoveOutcome, NoAdmission, Role, RoleKind};
use crate::trip_chain::TripChain;

// ── PersonCore ────────────────────────────────────────────────────────────────

/// Everything of a person except its role — the part facets mutate.
///
/// Placement is index-based (`SegmentId` + lane index + distance to segment
/// end) so persons can be moved between containers and workers without any
/// pointer fixup.
pub struct PersonCore {
    pub id: EntityId,
    pub start_ms: u64,
    pub is_fake: bool,
    pub origin: NodeId,
    pub destination: NodeId,
    pub rng: EntityRng,
    pub worker: Option<WorkerId>,
    pub chain: TripChain,

    // Buffered cells: committed position/speed other threads may read.
    x: Shared<i64>,
    y: Shared<i64>,
    speed: Shared<f64>,

    // Road placement.  `segment == SegmentId::INVALID` while off-road.
    pub segment: SegmentId,
    /// Lane index within `segment`; `LaneId::INFINITY` = lane infinity.
    pub lane: u16,
    pub distance_to_seg_end_cm: i64,
    pub is_queuing: bool,
    /// Off-road position (pedestrians, activity performers).
    pub walk_pos: Point,

    // Per-tick bookkeeping.
    pub remaining_ms: u64,
    pub last_ticked_frame: Option<u64>,

    // Travel-time stamps (ms from epoch of entering current link/segment).
    pub link_entry_ms: u64,
    pub seg_entry_ms: u64,

    census: Option<Arc<PopulationCensus>>,
}

impl PersonCore {
    /// Publish a committed position and speed for next tick's readers.
    pub fn publish_position(&mut self, pos: Point, speed_mps: f64) {
        self.x.set(pos.x_cm);
        self.y.set(pos.y_cm);
        self.speed.set(speed_mps);
    }

    /// The position other threads currently observe (previous tick's commit).
    pub fn committed_position(&self) -> Point {
        Point::new(self.x.get(), self.y.get())
    }

    /// This tick's position: interpolated along the segment when on-road,
    /// `walk_pos` otherwise.
    pub fn live_position(&self, network: &RoadNetwork) -> Point {
        if self.on_road() {
            let seg = network.segment(self.segment);
            network.position_on_segment(self.segment, seg.length_cm - self.distance_to_seg_end_cm)
        } else {
            self.walk_pos
        }
    }

    #[inline]
    pub fn on_road(&self) -> bool {
        self.segment != SegmentId::INVALID
    }

    #[inline]
    pub fn lane_id(&self) -> LaneId {
        LaneId { segment: self.segment, index: self.lane }
    }

    /// Registrations for this person's cells (position, speed).
    pub fn subscriptions(&self) -> Vec<CellRegistration> {
        vec![self.x.registration(), self.y.registration(), self.speed.registration()]
    }

    /// Ids of this person's cells, for deregistration at retirement.
    pub fn cell_ids(&self) -> Vec<CellId> {
        vec![self.x.id(), self.y.id(), self.speed.id()]
    }
}

// ── PersonProps ───────────────────────────────────────────────────────────────

/// Placement snapshot taken before and after one movement tick; the conflux
/// housekeeps by diffing the two.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PersonProps {
    pub segment: SegmentId,
    pub lane: u16,
    pub distance_to_seg_end_cm: i64,
    pub is_queuing: bool,
    pub role: RoleKind,
}

// ── TripSwitch ────────────────────────────────────────────────────────────────

/// Result of advancing the trip chain after a role completed.
pub enum TripSwitch {
    /// A new role is active (its `frame_init` has run).
    Switched(RoleKind),
    /// The chain is exhausted; the person is done.
    Finished,
    /// The next item could not be instantiated; retire the person.
    Failed(PersonError),
}

// ── Person ────────────────────────────────────────────────────────────────────

/// A member of the simulated population.
pub struct Person {
    pub core: PersonCore,
    pub role: Role,
}

impl Person {
    /// Build a person with the first role of its trip chain already
    /// instantiated.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: EntityId,
        start_ms: u64,
        origin: NodeId,
        destination: NodeId,
        chain: TripChain,
        strategy: MutexStrategy,
        run_seed: u64,
        network: &RoadNetwork,
    ) -> PersonResult<Person> {
        if chain.is_empty() {
            return Err(PersonError::EmptyTripChain { person: id });
        }
        let start_pos = network.node(origin).location;
        let mut core = PersonCore {
            id,
            start_ms,
            is_fake: false,
            origin,
            destination,
            rng: EntityRng::new(run_seed, id),
            worker: None,
            chain,
            x: Shared::new(strategy, start_pos.x_cm),
            y: Shared::new(strategy, start_pos.y_cm),
            speed: Shared::new(strategy, 0.0),
            segment: SegmentId::INVALID,
            lane: LaneId::INFINITY,
            distance_to_seg_end_cm: 0,
            is_queuing: false,
            walk_pos: start_pos,
            remaining_ms: 0,
            last_ticked_frame: None,
            link_entry_ms: start_ms,
            seg_entry_ms: start_ms,
            census: None,
        };
        let first = core.chain.current().expect("chain checked non-empty").clone();
        let role = Role::for_item(&first, id, &mut core, network)?;
        Ok(Person { core, role })
    }

    /// Register with the run-wide census.  Call once, right after `new`.
    pub fn attach_census(&mut self, census: Arc<PopulationCensus>) {
        census.note_created();
        self.core.census = Some(census);
    }

    /// Mark as a ghost mirroring a remote partition.
    pub fn mark_fake(&mut self) {
        self.core.is_fake = true;
    }

    pub fn role_kind(&self) -> RoleKind {
        self.role.kind()
    }

    /// The first road segment of the current trip item, if it has one —
    /// where the starting conflux admits this person.
    pub fn starting_segment(&self) -> Option<SegmentId> {
        use crate::trip_chain::{TravelMode, TripItem};
        match self.core.chain.current()? {
            TripItem::Trip(trip) => match trip.mode {
                TravelMode::Car | TravelMode::BusService => trip.segment_path.first().copied(),
                _ => None,
            },
            TripItem::Activity { .. } => None,
        }
    }

    pub fn props(&self) -> PersonProps {
        PersonProps {
            segment: self.core.segment,
            lane: self.core.lane,
            distance_to_seg_end_cm: self.core.distance_to_seg_end_cm,
            is_queuing: self.core.is_queuing,
            role: self.role.kind(),
        }
    }

    /// Run the active role's `frame_init`.
    pub fn init_movement(&mut self, ctx: &mut MoveContext<'_>) {
        self.role.frame_init(&mut self.core, ctx);
    }

    /// Run the active role's `frame_tick`.
    pub fn tick_movement(&mut self, ctx: &mut MoveContext<'_>) -> MoveOutcome {
        self.role.frame_tick(&mut self.core, ctx)
    }

    pub fn describe(&self) -> String {
        self.role.describe(&self.core)
    }

    /// Advance the trip chain after the active role completed, instantiating
    /// and initialising the next role.
    pub fn switch_to_next_item(&mut self, ctx: &mut MoveContext<'_>) -> TripSwitch {
        let Some(next) = self.core.chain.advance().cloned() else {
            return TripSwitch::Finished;
        };
        match Role::for_item(&next, self.core.id, &mut self.core, ctx.network) {
            Ok(role) => {
                self.role = role;
                // Placement resets; the new role re-establishes it in init.
                self.core.segment = SegmentId::INVALID;
                self.core.lane = LaneId::INFINITY;
                self.core.is_queuing = false;
                self.role.frame_init(&mut self.core, ctx);
                TripSwitch::Switched(self.role.kind())
            }
            Err(e) => TripSwitch::Failed(e),
        }
    }

    /// Replace the active role directly (boarding turns a waiting person into
    /// a passenger without consuming a trip item).
    pub fn replace_role(&mut self, role: Role) {
        self.role = role;
    }
}

impl Drop for Person {
    fn drop(&mut self) {
        // Retirement accounting happens at drop so every exit path — conflux
        // kill, work-group removal, bus teardown — counts exactly once.
        if let Some(census) = &self.core.census {
            census.note_retired();
        }
    }
}

// ── Standalone Entity impl ────────────────────────────────────────────────────

/// Empty network for persons ticked directly by a worker (no conflux): only
/// off-road roles can advance there.
fn offroad_network() -> &'static RoadNetwork {
    static EMPTY: OnceLock<RoadNetwork> = OnceLock::new();
    EMPTY.get_or_init(|| {
        RoadNetworkBuilder::new().build().expect("empty network is always valid")
    })
}

impl Entity for Person {
    fn id(&self) -> EntityId {
        self.core.id
    }

    fn start_ms(&self) -> u64 {
        self.core.start_ms
    }

    fn is_fake(&self) -> bool {
        self.core.is_fake
    }

    fn current_worker(&self) -> Option<WorkerId> {
        self.core.worker
    }

    fn set_current_worker(&mut self, worker: Option<WorkerId>) {
        self.core.worker = worker;
    }

    fn subscriptions(&self) -> Vec<CellRegistration> {
        self.core.subscriptions()
    }

    fn frame_init(&mut self, ctx: &mut TickContext<'_>) {
        if self.role.kind().occupies_lane() {
            return; // retired on the first tick; see frame_tick
        }
        let admission = NoAdmission;
        let mut mctx =
            MoveContext::new(ctx.now, ctx.base_gran_ms, offroad_network(), &admission);
        self.init_movement(&mut mctx);
    }

    /// Tick a person that runs directly on a worker, outside any conflux.
    ///
    /// Road-bound roles need conflux supply management; a person reaching one
    /// here is a staging error and is retired (absorbed, not fatal).
    fn frame_tick(&mut self, ctx: &mut TickContext<'_>) -> UpdateStatus {
        if self.role.kind().occupies_lane() {
            warn!(person = %self.core.id, role = self.role.kind().tag(),
                  "road-bound role ticked outside a conflux; retiring");
            return UpdateStatus::done();
        }

        self.core.remaining_ms = ctx.base_gran_ms as u64;
        self.core.last_ticked_frame = Some(ctx.now.frame);
        let admission = NoAdmission;
        let mut mctx =
            MoveContext::new(ctx.now, ctx.base_gran_ms, offroad_network(), &admission);

        match self.tick_movement(&mut mctx) {
            MoveOutcome::Stay | MoveOutcome::EnteredNextLink => UpdateStatus::proceed(),
            MoveOutcome::Completed => match self.switch_to_next_item(&mut mctx) {
                TripSwitch::Finished => UpdateStatus::done(),
                TripSwitch::Failed(e) => {
                    warn!(person = %self.core.id, error = %e, "trip switch failed; retiring");
                    UpdateStatus::done()
                }
                TripSwitch::Switched(kind) if kind.occupies_lane() => {
                    warn!(person = %self.core.id, role = kind.tag(),
                          "next role needs a conflux; retiring standalone person");
                    UpdateStatus::done()
                }
                TripSwitch::Switched(_) => UpdateStatus::proceed(),
            },
        }
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}
