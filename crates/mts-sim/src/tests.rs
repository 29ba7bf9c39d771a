//! End-to-end scenarios through the full stack: builder → work group →
//! confluxes → outputs.

use std::sync::{Arc, Mutex};

use mts_core::{EntityId, NodeId, Point, SegmentId, SimConfig, Timeslice};
use mts_net::{Lane, RoadNetwork, RoadNetworkBuilder};
use mts_output::TraceRow;
use mts_workers::StageReport;

use crate::{NoopObserver, PersonSpec, SimBuilder, SimObserver, TripSpec};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn config(end_tick: u64, gran_ms: u32, workers: usize) -> SimConfig {
    SimConfig {
        base_gran_ms: gran_ms,
        sim_start_ms: 0,
        end_tick,
        tick_step: 1,
        seed: 42,
        num_workers: workers,
        aura_active: false,
        ..SimConfig::default()
    }
}

/// Straight corridor: nodes every `seg_cm`, one one-lane segment per link.
fn corridor(seg_cm: &[i64], speed: f64) -> RoadNetwork {
    let mut b = RoadNetworkBuilder::new();
    let mut x = 0;
    let mut prev = b.add_node(Point::new(0, 0));
    for &len in seg_cm {
        x += len;
        let next = b.add_node(Point::new(x, 0));
        let link = b.add_link(prev, next);
        b.add_segment(link, len, 700, speed, vec![Lane::vehicle(350)]);
        prev = next;
    }
    b.build().unwrap()
}

/// Observer that collects trace rows.
#[derive(Default)]
struct Collector {
    traces: Arc<Mutex<Vec<TraceRow>>>,
}

impl SimObserver for Collector {
    fn on_traces(&mut self, rows: &[TraceRow]) {
        self.traces.lock().unwrap().extend_from_slice(rows);
    }
}

// ── Scenario: single driver ───────────────────────────────────────────────────

#[cfg(test)]
mod single_driver {
    use super::*;

    /// One driver over one 100 m segment at 10 m/s with 100 ms ticks covers
    /// 1 m per tick: arrival and removal within ~100 ticks, population fully
    /// drained, run stops by itself (end_tick = 0).
    #[test]
    fn drains_and_stops() {
        let net = corridor(&[10_000], 10.0);
        let sim = SimBuilder::new(config(0, 100, 2), net)
            .add_person(PersonSpec::starting_at(
                0,
                vec![TripSpec::Drive { from: NodeId(0), to: NodeId(1) }],
            ))
            .build()
            .unwrap();

        let summary = sim.run(&mut NoopObserver).unwrap();
        assert_eq!(summary.persons_created, 1);
        assert_eq!(summary.persons_retired, 1);
        assert_eq!(summary.persons_skipped, 0);
        // Speed factors span 0.9–1.1 × free flow: ~91 to ~112 driving
        // ticks plus one staging/stop cycle.
        assert!(
            (90..=120).contains(&summary.cycles_run),
            "expected ~100 cycles, got {}",
            summary.cycles_run
        );
    }

    /// The CSV sink receives the run's rows through the hub.
    #[test]
    fn csv_writer_gets_the_rows() {
        let dir = tempfile::tempdir().unwrap();
        let net = corridor(&[10_000], 10.0);
        let writer = mts_output::CsvWriter::new(dir.path()).unwrap();
        let sim = SimBuilder::new(config(0, 100, 1), net)
            .add_person(PersonSpec::starting_at(
                0,
                vec![TripSpec::Drive { from: NodeId(0), to: NodeId(1) }],
            ))
            .writer(Box::new(writer))
            .build()
            .unwrap();
        sim.run(&mut NoopObserver).unwrap();

        let traces = std::fs::read_to_string(dir.path().join("trace.csv")).unwrap();
        assert!(traces.lines().count() > 90, "one trace line per driven tick");
        let seg = std::fs::read_to_string(dir.path().join("segment_travel_times.csv")).unwrap();
        assert!(seg.lines().count() >= 2, "header plus the crossing row");
    }
}

// ── Scenario: clean shutdown at end_tick ──────────────────────────────────────

#[cfg(test)]
mod shutdown {
    use super::*;

    #[test]
    fn end_tick_ten_hits_each_barrier_ten_times() {
        let net = corridor(&[10_000], 10.0);
        // A driver that will not finish within 10 ticks keeps the run busy.
        let sim = SimBuilder::new(config(10, 100, 2), net)
            .add_person(PersonSpec::starting_at(
                0,
                vec![TripSpec::Drive { from: NodeId(0), to: NodeId(1) }],
            ))
            .build()
            .unwrap();

        let summary = sim.run(&mut NoopObserver).unwrap();
        assert_eq!(summary.ticks_run, 10);
        assert_eq!(summary.cycles_run, 10);
        assert_eq!(summary.shared_barrier_hits, 10);
        assert_eq!(summary.external_barrier_hits, 10);
        // The driver is still mid-trip: created but not retired.
        assert_eq!(summary.persons_created, 1);
        assert_eq!(summary.persons_retired, 0);
    }
}

// ── Scenario: deferred start ──────────────────────────────────────────────────

#[cfg(test)]
mod deferred_start {
    use super::*;

    /// A person with start time 5 × gran is first observed at frame 5.
    #[test]
    fn first_trace_is_frame_five() {
        let net = corridor(&[10_000], 10.0);
        let mut observer = Collector::default();
        let traces = Arc::clone(&observer.traces);

        let sim = SimBuilder::new(config(12, 100, 2), net)
            .add_person(PersonSpec::starting_at(
                500,
                vec![TripSpec::Drive { from: NodeId(0), to: NodeId(1) }],
            ))
            .build()
            .unwrap();
        sim.run(&mut observer).unwrap();

        let traces = traces.lock().unwrap();
        assert!(!traces.is_empty());
        assert_eq!(traces.iter().map(|t| t.frame).min(), Some(5));
    }
}

// ── Scenario: two drivers on disjoint links are independent ──────────────────

#[cfg(test)]
mod independence {
    use super::*;

    fn two_corridor_net() -> RoadNetwork {
        let mut b = RoadNetworkBuilder::new();
        let n0 = b.add_node(Point::new(0, 0));
        let n1 = b.add_node(Point::new(10_000, 0));
        let n2 = b.add_node(Point::new(0, 50_000));
        let n3 = b.add_node(Point::new(10_000, 50_000));
        for (a, z) in [(n0, n1), (n2, n3)] {
            let link = b.add_link(a, z);
            b.add_segment(link, 10_000, 700, 10.0, vec![Lane::vehicle(350)]);
        }
        b.build().unwrap()
    }

    fn spec(which: u64) -> PersonSpec {
        let (from, to) = if which == 0 {
            (NodeId(0), NodeId(1))
        } else {
            (NodeId(2), NodeId(3))
        };
        // Forced ids well above the conflux ids so each person keeps the
        // same id — and therefore the same RNG stream — in every run.
        PersonSpec {
            preferred_id: Some(100 + which),
            start_ms: 0,
            items: vec![TripSpec::Drive { from, to }],
        }
    }

    fn run(specs: Vec<PersonSpec>) -> Vec<(u64, u64, i64, i64)> {
        let mut observer = Collector::default();
        let traces = Arc::clone(&observer.traces);
        let sim = SimBuilder::new(config(0, 100, 2), two_corridor_net())
            .persons(specs)
            .build()
            .unwrap();
        sim.run(&mut observer).unwrap();
        let mut rows: Vec<(u64, u64, i64, i64)> = traces
            .lock()
            .unwrap()
            .iter()
            .map(|t| (t.entity_id, t.frame, t.x_cm, t.y_cm))
            .collect();
        rows.sort_unstable();
        rows
    }

    #[test]
    fn per_tick_positions_match_solo_runs() {
        let together = run(vec![spec(0), spec(1)]);
        let mut solo = [run(vec![spec(0)]), run(vec![spec(1)])].concat();
        solo.sort_unstable();
        assert_eq!(together, solo);
    }
}

// ── Scenario: pedestrian ──────────────────────────────────────────────────────

#[cfg(test)]
mod pedestrian {
    use super::*;

    /// Walking 2 m (Manhattan) at 1 m/s with 1 s ticks: removal by tick 3.
    #[test]
    fn removed_within_three_ticks() {
        let mut b = RoadNetworkBuilder::new();
        let n0 = b.add_node(Point::new(0, 0));
        let n1 = b.add_node(Point::new(100, 100));
        let link = b.add_link(n0, n1);
        b.add_segment(link, 200, 700, 10.0, vec![Lane::vehicle(350)]);
        let net = b.build().unwrap();

        let sim = SimBuilder::new(config(0, 1000, 1), net)
            .add_person(PersonSpec::starting_at(
                0,
                vec![TripSpec::Walk { from: n0, to: n1, speed_mps: Some(1.0) }],
            ))
            .build()
            .unwrap();
        let summary = sim.run(&mut NoopObserver).unwrap();
        assert_eq!(summary.persons_retired, 1);
        assert!(summary.cycles_run <= 3, "took {} ticks", summary.cycles_run);
    }
}

// ── Scenario: unroutable persons are skipped, the run continues ──────────────

#[cfg(test)]
mod topology_errors {
    use super::*;

    #[test]
    fn bad_route_is_skipped_not_fatal() {
        let net = corridor(&[10_000], 10.0);
        // Links are directed; 1 → 0 has no route.
        let sim = SimBuilder::new(config(0, 100, 1), net)
            .add_person(PersonSpec::starting_at(
                0,
                vec![TripSpec::Drive { from: NodeId(1), to: NodeId(0) }],
            ))
            .add_person(PersonSpec::starting_at(
                0,
                vec![TripSpec::Drive { from: NodeId(0), to: NodeId(1) }],
            ))
            .build()
            .unwrap();
        let summary = sim.run(&mut NoopObserver).unwrap();
        assert_eq!(summary.persons_skipped, 1);
        assert_eq!(summary.persons_created, 1);
        assert_eq!(summary.persons_retired, 1);
    }
}

// ── Scenario: aura phase ──────────────────────────────────────────────────────

#[cfg(test)]
mod aura {
    use super::*;

    /// Observer that queries the aura index every tick.
    struct AuraProbe {
        aura: Arc<mts_net::AuraManager>,
        hits: Vec<(u64, usize)>,
    }

    impl SimObserver for AuraProbe {
        fn on_tick_end(&mut self, now: Timeslice, report: &StageReport) {
            if report.advanced {
                let found = self.aura.agents_in_rect(
                    Point::new(-1, -1),
                    Point::new(1_000_000, 1_000_000),
                    None,
                );
                self.hits.push((now.frame, found.len()));
            }
        }
    }

    #[test]
    fn index_is_rebuilt_each_tick_and_doubles_the_external_hits() {
        let net = corridor(&[10_000], 10.0);
        let cfg = SimConfig { aura_active: true, ..config(20, 100, 2) };
        let sim = SimBuilder::new(cfg, net)
            .add_person(PersonSpec::starting_at(
                0,
                vec![TripSpec::Drive { from: NodeId(0), to: NodeId(1) }],
            ))
            .build()
            .unwrap();

        let mut probe = AuraProbe { aura: sim.aura(), hits: Vec::new() };
        let summary = sim.run(&mut probe).unwrap();

        assert_eq!(summary.shared_barrier_hits, 20);
        assert_eq!(summary.external_barrier_hits, 40, "two external hits per cycle");
        // From the second tick on, the driver's committed position is indexed.
        assert!(probe.hits.iter().skip(2).all(|&(_, n)| n == 1));
    }

    #[test]
    fn excluded_agent_is_filtered() {
        let aura = mts_net::AuraManager::new();
        aura.rebuild(vec![
            (EntityId(0), Point::new(10, 10)),
            (EntityId(1), Point::new(20, 20)),
        ]);
        let hits =
            aura.agents_in_rect(Point::new(0, 0), Point::new(100, 100), Some(EntityId(0)));
        assert_eq!(hits, vec![EntityId(1)]);
    }
}

// ── Scenario: incidents through the event queue ───────────────────────────────

#[cfg(test)]
mod incidents {
    use super::*;

    #[test]
    fn incident_holds_the_driver_until_cleared() {
        let net = corridor(&[10_000], 10.0);
        // 1 s ticks: unimpeded crossing takes ~10 ticks.
        let mut sim = SimBuilder::new(config(0, 1000, 1), net)
            .add_person(PersonSpec::starting_at(
                0,
                vec![TripSpec::Drive { from: NodeId(0), to: NodeId(1) }],
            ))
            .build()
            .unwrap();
        // Freeze the segment from the start; clear at 30 s.
        sim.schedule_incident(0, SegmentId(0), 0.0);
        sim.schedule_incident_clear(30_000, SegmentId(0));

        let summary = sim.run(&mut NoopObserver).unwrap();
        assert_eq!(summary.persons_retired, 1);
        assert!(
            summary.cycles_run > 30,
            "driver finished in {} ticks despite the incident",
            summary.cycles_run
        );
    }
}
