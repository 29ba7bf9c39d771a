//! Population specs and the simulation builder.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::warn;

use mts_conflux::conflux::{Conflux, ConfluxDirectory, ConfluxInbox};
use mts_core::{
    BusStopId, ConfluxId, EntityId, EntityIdAllocator, NodeId, SegmentId, SimConfig,
};
use mts_entity::{Entity, ErrorLatch, MessageBus, PopulationCensus};
use mts_net::{AuraManager, RoadNetwork, segment_path};
use mts_output::{NullWriter, OutputHub, OutputWriter};
use mts_person::{Person, SubTrip, TravelMode, TripChain, TripItem};
use mts_workers::{EntityLoader, EntityTickAction, LoadDecision, WorkGroup};

use crate::error::SimResult;
use crate::sim::Simulation;

// ── Population specs ──────────────────────────────────────────────────────────

/// One leg of a person's day, in network terms.  The builder resolves these
/// into trip-chain items (deriving segment paths where needed).
#[derive(Clone, Debug)]
pub enum TripSpec {
    /// Drive from node to node along the shortest link path.
    Drive { from: NodeId, to: NodeId },
    /// Drive a bus service along the shortest link path, serving stops.
    DriveBus { from: NodeId, to: NodeId, serve_stops: Vec<BusStopId> },
    /// Wait at `board`, ride, alight at `alight` (route end when `None`).
    RideBus { from: NodeId, to: NodeId, board: BusStopId, alight: Option<BusStopId> },
    /// Walk in a straight line.
    Walk { from: NodeId, to: NodeId, speed_mps: Option<f64> },
    /// Rail leg: a timed teleport.
    Rail { from: NodeId, to: NodeId, ride_ms: u64 },
    /// Stay at `at` for `duration_ms`.
    Activity { at: NodeId, duration_ms: u64 },
}

/// One person to simulate.
#[derive(Clone, Debug)]
pub struct PersonSpec {
    /// Forced id; must exceed every id assigned so far to be honoured.
    pub preferred_id: Option<u64>,
    /// Activation time in ms from the simulation epoch.
    pub start_ms: u64,
    pub items: Vec<TripSpec>,
}

impl PersonSpec {
    pub fn starting_at(start_ms: u64, items: Vec<TripSpec>) -> Self {
        Self { preferred_id: None, start_ms, items }
    }
}

// ── Loader ────────────────────────────────────────────────────────────────────

/// Routes staged persons into the conflux owning their starting segment
/// (drivers), their boarding stop (riders), or their origin node (off-road
/// roles).
struct ConfluxLoader {
    network: Arc<RoadNetwork>,
    directory: Arc<ConfluxDirectory>,
    node_inbox: FxHashMap<NodeId, Arc<ConfluxInbox>>,
    fallback: Arc<ConfluxInbox>,
}

impl ConfluxLoader {
    fn inbox_for(&self, person: &Person) -> Arc<ConfluxInbox> {
        let by_segment = person.starting_segment().or_else(|| {
            match person.core.chain.current() {
                Some(TripItem::Trip(t)) if t.mode == TravelMode::Bus => {
                    t.board_stop.map(|s| self.network.bus_stop(s).segment)
                }
                _ => None,
            }
        });
        if let Some(seg) = by_segment {
            let link = self.network.segment(seg).link;
            if let Some(inbox) = self.directory.lookup(link) {
                return Arc::clone(inbox);
            }
        }
        self.node_inbox
            .get(&person.core.origin)
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }
}

impl EntityLoader for ConfluxLoader {
    fn route(&mut self, entity: Box<dyn Entity>) -> LoadDecision {
        match entity.into_any().downcast::<Person>() {
            Ok(person) => {
                let inbox = self.inbox_for(&person);
                inbox.stage(person);
                LoadDecision::Absorbed
            }
            Err(_) => {
                // Only persons travel through a conflux simulation's pending
                // queue; anything else is a wiring bug.
                warn!("non-person entity reached the conflux loader; dropped");
                LoadDecision::Absorbed
            }
        }
    }
}

// ── SimBuilder ────────────────────────────────────────────────────────────────

/// Fluent builder for a [`Simulation`].
///
/// # Example
///
/// ```rust,ignore
/// let sim = SimBuilder::new(config, network)
///     .persons(specs)
///     .writer(Box::new(CsvWriter::new(out_dir)?))
///     .build()?;
/// let summary = sim.run(&mut NoopObserver)?;
/// ```
pub struct SimBuilder {
    config: SimConfig,
    network: RoadNetwork,
    persons: Vec<PersonSpec>,
    writer: Box<dyn OutputWriter>,
}

impl SimBuilder {
    pub fn new(config: SimConfig, network: RoadNetwork) -> Self {
        Self { config, network, persons: Vec::new(), writer: Box::new(NullWriter) }
    }

    pub fn persons(mut self, specs: Vec<PersonSpec>) -> Self {
        self.persons.extend(specs);
        self
    }

    pub fn add_person(mut self, spec: PersonSpec) -> Self {
        self.persons.push(spec);
        self
    }

    pub fn writer(mut self, writer: Box<dyn OutputWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Validate, wire the confluxes, resolve the population, and assemble
    /// the runnable simulation.
    ///
    /// Persons whose trips cannot be resolved (no route, bad references) are
    /// skipped with a logged explanation; the count lands in
    /// [`SimSummary::persons_skipped`][crate::SimSummary].
    pub fn build(self) -> SimResult<Simulation> {
        self.config.validate()?;
        let config = self.config;
        let network = Arc::new(self.network);
        let hub = Arc::new(OutputHub::new());
        let census = Arc::new(PopulationCensus::new());
        let bus = Arc::new(MessageBus::new());
        let latch = Arc::new(ErrorLatch::new());
        let alloc = EntityIdAllocator::new();

        // One conflux per node that terminates at least one link.
        let mut confluxes: Vec<Conflux> = Vec::new();
        let mut node_inbox: FxHashMap<NodeId, Arc<ConfluxInbox>> = FxHashMap::default();
        let mut segment_conflux: FxHashMap<SegmentId, EntityId> = FxHashMap::default();
        let mut directory = ConfluxDirectory::new();
        for node in network.nodes() {
            if network.incoming_links(node.id).is_empty() {
                continue;
            }
            let conflux = Conflux::new(
                ConfluxId(confluxes.len() as u32),
                alloc.allocate(),
                node.id,
                Arc::clone(&network),
                Arc::clone(&hub),
                config.base_gran_ms,
            );
            node_inbox.insert(node.id, conflux.inbox());
            for &link in network.incoming_links(node.id) {
                directory.register(link, conflux.inbox());
                for &seg in &network.link(link).segments {
                    segment_conflux.insert(seg, conflux.id());
                }
            }
            confluxes.push(conflux);
        }
        let directory = Arc::new(directory);
        for c in &mut confluxes {
            c.set_directory(Arc::clone(&directory));
        }

        // Resolve the population.
        let mut persons: Vec<Person> = Vec::new();
        let mut skipped = 0u64;
        for spec in self.persons {
            match resolve_person(&spec, &network, &alloc, &config) {
                Ok(mut person) => {
                    person.attach_census(Arc::clone(&census));
                    persons.push(person);
                }
                Err(reason) => {
                    warn!(start_ms = spec.start_ms, reason, "skipping unroutable person");
                    skipped += 1;
                }
            }
        }

        // Assemble the work group.
        let mut group = WorkGroup::new(
            config.num_workers,
            config.end_tick,
            config.tick_step,
            config.aura_active,
            config.base_gran_ms,
            Arc::clone(&bus),
            Arc::clone(&latch),
        );
        let loader = ConfluxLoader {
            network: Arc::clone(&network),
            directory: Arc::clone(&directory),
            node_inbox,
            fallback: confluxes
                .first()
                .map(Conflux::inbox)
                .unwrap_or_else(|| Arc::new(ConfluxInbox::new(ConfluxId(0), Vec::new()))),
        };
        group.init_workers(Arc::new(EntityTickAction), Box::new(loader));
        {
            let census = Arc::clone(&census);
            group.set_drain_probe(Box::new(move || census.all_retired()));
        }
        for conflux in confluxes {
            group.seed_entity(Box::new(conflux), None);
        }
        for person in persons {
            group.schedule_entity(Box::new(person));
        }

        Ok(Simulation::assemble(
            config,
            group,
            Arc::new(AuraManager::new()),
            hub,
            census,
            latch,
            self.writer,
            segment_conflux,
            skipped,
        ))
    }
}

/// Turn one spec into a constructed person, or a human-readable skip reason.
fn resolve_person(
    spec: &PersonSpec,
    network: &RoadNetwork,
    alloc: &EntityIdAllocator,
    config: &SimConfig,
) -> Result<Person, &'static str> {
    if spec.items.is_empty() {
        return Err("empty trip list");
    }
    let mut items = Vec::with_capacity(spec.items.len());
    for item in &spec.items {
        items.push(match *item {
            TripSpec::Drive { from, to } => {
                let path = segment_path(network, from, to).map_err(|_| "no drivable route")?;
                TripItem::Trip(SubTrip::car(from, to, path))
            }
            TripSpec::DriveBus { from, to, ref serve_stops } => {
                let path = segment_path(network, from, to).map_err(|_| "no bus route")?;
                let mut trip = SubTrip::car(from, to, path);
                trip.mode = TravelMode::BusService;
                trip.serve_stops = serve_stops.clone();
                TripItem::Trip(trip)
            }
            TripSpec::RideBus { from, to, board, alight } => {
                if board.index() >= network.bus_stop_count() {
                    return Err("unknown boarding stop");
                }
                let mut trip = SubTrip::walk(from, to);
                trip.mode = TravelMode::Bus;
                trip.board_stop = Some(board);
                trip.alight_stop = alight;
                TripItem::Trip(trip)
            }
            TripSpec::Walk { from, to, speed_mps } => {
                let mut trip = SubTrip::walk(from, to);
                trip.walk_speed_mps = speed_mps;
                TripItem::Trip(trip)
            }
            TripSpec::Rail { from, to, ride_ms } => {
                let mut trip = SubTrip::walk(from, to);
                trip.mode = TravelMode::Mrt;
                trip.ride_ms = ride_ms;
                TripItem::Trip(trip)
            }
            TripSpec::Activity { at, duration_ms } => TripItem::Activity { at, duration_ms },
        });
    }

    let (origin, destination) = endpoints(&spec.items);
    if origin.index() >= network.node_count() || destination.index() >= network.node_count() {
        return Err("origin or destination node unknown");
    }
    let id = match spec.preferred_id {
        Some(preferred) => alloc.allocate_preferred(preferred),
        None => alloc.allocate(),
    };
    Person::new(
        id,
        spec.start_ms,
        origin,
        destination,
        TripChain::new(items),
        config.mutex_strategy,
        config.seed,
        network,
    )
    .map_err(|_| "first trip leg could not be instantiated")
}

fn endpoints(items: &[TripSpec]) -> (NodeId, NodeId) {
    let node_of = |item: &TripSpec, start: bool| match *item {
        TripSpec::Drive { from, to }
        | TripSpec::DriveBus { from, to, .. }
        | TripSpec::RideBus { from, to, .. }
        | TripSpec::Walk { from, to, .. }
        | TripSpec::Rail { from, to, .. } => {
            if start {
                from
            } else {
                to
            }
        }
        TripSpec::Activity { at, .. } => at,
    };
    (
        node_of(items.first().expect("items checked non-empty"), true),
        node_of(items.last().expect("items checked non-empty"), false),
    )
}
