//! The simulation runner: the main thread's side of the barrier protocol.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{error, info};

use mts_core::{EntityId, SegmentId, SimConfig};
use mts_entity::{ErrorLatch, Message, PopulationCensus, ScheduledEvent};
use mts_net::AuraManager;
use mts_output::{OutputHub, OutputWriter};
use mts_workers::WorkGroup;

use crate::error::{SimError, SimResult};
use crate::observer::SimObserver;

// ── SimSummary ────────────────────────────────────────────────────────────────

/// What a completed run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimSummary {
    /// Base ticks driven (strided calls included).
    pub ticks_run: u64,
    /// Barrier cycles actually executed.
    pub cycles_run: u64,
    pub persons_created: u64,
    pub persons_retired: u64,
    /// Specs the builder could not resolve into persons.
    pub persons_skipped: u64,
    pub shared_barrier_hits: u64,
    pub external_barrier_hits: u64,
}

// ── Simulation ────────────────────────────────────────────────────────────────

/// A fully wired run: work group, aura manager, output plumbing.
///
/// Created by [`SimBuilder`][crate::SimBuilder]; consumed by [`run`](Self::run).
pub struct Simulation {
    config: SimConfig,
    group: WorkGroup,
    aura: Arc<AuraManager>,
    hub: Arc<OutputHub>,
    census: Arc<PopulationCensus>,
    latch: Arc<ErrorLatch>,
    writer: Box<dyn OutputWriter>,
    /// Which conflux entity owns each segment — the address book for
    /// incident messages.
    segment_conflux: FxHashMap<SegmentId, EntityId>,
    persons_skipped: u64,
}

impl Simulation {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        config: SimConfig,
        group: WorkGroup,
        aura: Arc<AuraManager>,
        hub: Arc<OutputHub>,
        census: Arc<PopulationCensus>,
        latch: Arc<ErrorLatch>,
        writer: Box<dyn OutputWriter>,
        segment_conflux: FxHashMap<SegmentId, EntityId>,
        persons_skipped: u64,
    ) -> Self {
        Self {
            config,
            group,
            aura,
            hub,
            census,
            latch,
            writer,
            segment_conflux,
            persons_skipped,
        }
    }

    /// The aura manager (rebuilt per tick when `aura_active`).
    pub fn aura(&self) -> Arc<AuraManager> {
        Arc::clone(&self.aura)
    }

    pub fn census(&self) -> Arc<PopulationCensus> {
        Arc::clone(&self.census)
    }

    /// Schedule an incident: at `at_ms`, every lane of `segment` drops to
    /// `flow_per_tick` until the matching [`clear`](Self::schedule_incident_clear).
    pub fn schedule_incident(&mut self, at_ms: u64, segment: SegmentId, flow_per_tick: f64) {
        self.schedule_to_conflux(
            at_ms,
            segment,
            Message::InsertIncident { segment, flow_per_tick },
        );
    }

    pub fn schedule_incident_clear(&mut self, at_ms: u64, segment: SegmentId) {
        self.schedule_to_conflux(at_ms, segment, Message::RemoveIncident { segment });
    }

    fn schedule_to_conflux(&mut self, at_ms: u64, segment: SegmentId, msg: Message) {
        match self.segment_conflux.get(&segment) {
            Some(&to) => {
                self.group.schedule_event(at_ms, ScheduledEvent { to, from: None, msg });
            }
            None => error!(segment = %segment, "incident targets a segment owned by no conflux"),
        }
    }

    /// Drive the run to completion.
    ///
    /// Returns the summary on a clean finish (all ticks executed, or all
    /// entities drained when `end_tick == 0`).  A latched kernel fault tears
    /// the run down and surfaces as `Err(SimError::Kernel)`.
    pub fn run<O: SimObserver>(mut self, observer: &mut O) -> SimResult<SimSummary> {
        let mut clock = self.config.make_clock();
        let mut cycles = 0u64;

        info!(
            end_tick = self.config.end_tick,
            workers = self.config.num_workers,
            gran_ms = self.config.base_gran_ms,
            "starting simulation"
        );
        self.group.start_all();

        let fault = loop {
            observer.on_tick_start(clock.now());
            let report = self.group.wait();

            if report.advanced {
                cycles += 1;
                if self.config.aura_active {
                    // Exclusive window between the two external hits.
                    self.aura.rebuild(self.hub.drain_positions());
                    self.group.wait_extern_again();
                } else {
                    // Nobody consumes positions; do not let them pile up.
                    drop(self.hub.drain_positions());
                }

                // Checked only once the full barrier cycle is complete, so an
                // abort never leaves workers parked at a barrier.
                if self.latch.is_raised() {
                    break self.latch.fault().map(|f| (f, report.stopping));
                }

                self.flush_outputs(observer)?;
            }

            clock.advance();
            observer.on_tick_end(clock.now(), &report);

            if report.stopping {
                self.group.join_all(false);
                break None;
            }
        };

        if let Some((fault, workers_already_stopping)) = fault {
            error!(%fault, "kernel fault latched; aborting");
            // Workers past a stopping cycle have exited on their own; anyone
            // else needs one more released cycle to observe the stop flag.
            self.group.join_all(!workers_already_stopping);
            let _ = self.writer.finish();
            return Err(SimError::Kernel(fault));
        }

        // Workers are joined; flush whatever the final cycle produced.
        self.flush_outputs(observer)?;
        self.writer.finish()?;
        observer.on_sim_end(clock.now());

        let summary = SimSummary {
            ticks_run: clock.current_frame,
            cycles_run: cycles,
            persons_created: self.census.created(),
            persons_retired: self.census.retired(),
            persons_skipped: self.persons_skipped,
            shared_barrier_hits: self.group.shared_barrier_hits(),
            external_barrier_hits: self.group.external_barrier_hits(),
        };
        info!(?summary, "simulation finished");
        Ok(summary)
    }

    fn flush_outputs<O: SimObserver>(&mut self, observer: &mut O) -> SimResult<()> {
        let traces = self.hub.drain_traces();
        if !traces.is_empty() {
            self.writer.write_traces(&traces)?;
            observer.on_traces(&traces);
        }
        let seg_rows = self.hub.drain_segment_times();
        let link_rows = self.hub.drain_link_times();
        if !seg_rows.is_empty() {
            self.writer.write_segment_times(&seg_rows)?;
        }
        if !link_rows.is_empty() {
            self.writer.write_link_times(&link_rows)?;
        }
        if !seg_rows.is_empty() || !link_rows.is_empty() {
            observer.on_travel_times(&seg_rows, &link_rows);
        }
        Ok(())
    }
}

/// Convenience for binaries: map the run result to a process exit code
/// (0 = clean completion, 1 = failure).
pub fn exit_code(result: &SimResult<SimSummary>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(_) => 1,
    }
}
