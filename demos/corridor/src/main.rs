//! corridor — smallest runnable example of the rust_mts kernel.
//!
//! A three-intersection arterial corridor (four nodes, three links of two
//! segments each), a small mixed population — cars, a bus line with riders,
//! pedestrians — and an incident that freezes the middle link for a stretch
//! of the run.  Writes CSV output to `./corridor-out/`.

use std::path::Path;
use std::process::ExitCode;

use tracing::info;

use mts_core::{NodeId, Point, SimConfig, Timeslice};
use mts_net::{Lane, RoadNetwork, RoadNetworkBuilder};
use mts_output::CsvWriter;
use mts_sim::{PersonSpec, SimBuilder, SimObserver, TripSpec, exit_code};
use mts_workers::StageReport;

// ── Constants ─────────────────────────────────────────────────────────────────

const BASE_GRAN_MS: u32 = 100; // 100 ms ticks
const SEED: u64 = 42;
const CAR_COUNT: u64 = 12;
const RIDER_COUNT: u64 = 4;
const WALKER_COUNT: u64 = 3;

// ── Network ───────────────────────────────────────────────────────────────────

/// Four nodes in a line, 400 m apart; each link split into two 200 m
/// segments with a bus stop on the first segment of every link.
fn build_network() -> (RoadNetwork, Vec<mts_core::BusStopId>) {
    let mut b = RoadNetworkBuilder::new();
    let nodes: Vec<NodeId> =
        (0..4i64).map(|i| b.add_node(Point::new(i * 40_000, 0))).collect();

    let mut stops = Vec::new();
    for w in nodes.windows(2) {
        let link = b.add_link(w[0], w[1]);
        let first = b.add_segment(link, 20_000, 700, 13.9, vec![Lane::vehicle(350); 2]);
        b.add_segment(link, 20_000, 700, 13.9, vec![Lane::vehicle(350); 2]);
        stops.push(b.add_bus_stop(first, 10_000));
    }
    (b.build().expect("demo network is valid"), stops)
}

// ── Population ────────────────────────────────────────────────────────────────

fn build_population(stops: &[mts_core::BusStopId]) -> Vec<PersonSpec> {
    let mut specs = Vec::new();

    // Cars entering over the first minute, full corridor.
    for i in 0..CAR_COUNT {
        specs.push(PersonSpec::starting_at(
            i * 5_000,
            vec![TripSpec::Drive { from: NodeId(0), to: NodeId(3) }],
        ));
    }

    // One bus line serving every stop, plus riders from stop 0 to stop 2.
    specs.push(PersonSpec::starting_at(
        10_000,
        vec![TripSpec::DriveBus { from: NodeId(0), to: NodeId(3), serve_stops: stops.to_vec() }],
    ));
    for i in 0..RIDER_COUNT {
        specs.push(PersonSpec::starting_at(
            i * 2_000,
            vec![TripSpec::RideBus {
                from: NodeId(0),
                to: NodeId(3),
                board: stops[0],
                alight: Some(stops[2]),
            }],
        ));
    }

    // Pedestrians covering the first block on foot, then resting.
    for _ in 0..WALKER_COUNT {
        specs.push(PersonSpec::starting_at(
            0,
            vec![
                TripSpec::Walk { from: NodeId(0), to: NodeId(1), speed_mps: None },
                TripSpec::Activity { at: NodeId(1), duration_ms: 60_000 },
            ],
        ));
    }

    specs
}

// ── Progress reporting ────────────────────────────────────────────────────────

struct Progress {
    traces_seen: usize,
}

impl SimObserver for Progress {
    fn on_tick_end(&mut self, now: Timeslice, report: &StageReport) {
        if report.advanced && now.frame % 100 == 0 {
            info!(frame = now.frame, staged = report.staged, "tick");
        }
    }

    fn on_traces(&mut self, rows: &[mts_output::TraceRow]) {
        self.traces_seen += rows.len();
    }
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let out_dir = Path::new("corridor-out");
    if let Err(e) = std::fs::create_dir_all(out_dir) {
        eprintln!("cannot create {}: {e}", out_dir.display());
        return ExitCode::FAILURE;
    }
    let writer = match CsvWriter::new(out_dir) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("cannot open output files: {e}");
            return ExitCode::FAILURE;
        }
    };

    let (network, stops) = build_network();
    let config = SimConfig {
        base_gran_ms: BASE_GRAN_MS,
        sim_start_ms: 0,
        end_tick: 0, // run until the whole population has finished
        tick_step: 1,
        seed: SEED,
        num_workers: 4,
        aura_active: true,
        ..SimConfig::default()
    };

    let result = SimBuilder::new(config, network)
        .persons(build_population(&stops))
        .writer(Box::new(writer))
        .build();
    let mut sim = match result {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("initialization failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Freeze the middle link's entry segment between 30 s and 60 s.
    let frozen = mts_core::SegmentId(2);
    sim.schedule_incident(30_000, frozen, 0.0);
    sim.schedule_incident_clear(60_000, frozen);

    let mut progress = Progress { traces_seen: 0 };
    let result = sim.run(&mut progress);
    match &result {
        Ok(summary) => {
            info!(
                ticks = summary.ticks_run,
                created = summary.persons_created,
                retired = summary.persons_retired,
                skipped = summary.persons_skipped,
                traces = progress.traces_seen,
                "done; output in {}",
                out_dir.display()
            );
        }
        Err(e) => eprintln!("simulation failed: {e}"),
    }
    ExitCode::from(exit_code(&result) as u8)
}
