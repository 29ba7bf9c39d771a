//! Main-thread observer hooks.

use mts_core::Timeslice;
use mts_output::{LinkTravelTimeRow, SegmentTravelTimeRow, TraceRow};
use mts_workers::StageReport;

/// Callbacks invoked by [`Simulation::run`][crate::Simulation::run] at key
/// points in the drive loop.  All run on the main thread, between barriers.
///
/// Default implementations are no-ops so implementors only override what
/// they care about.
pub trait SimObserver {
    /// Start of one base tick, before the barrier cycle.
    fn on_tick_start(&mut self, _now: Timeslice) {}

    /// End of one base tick.  `report.advanced` is false on strided calls
    /// that skipped the barriers.
    fn on_tick_end(&mut self, _now: Timeslice, _report: &StageReport) {}

    /// The tick's trace rows, drained from the hub (already forwarded to the
    /// output writer).
    fn on_traces(&mut self, _rows: &[TraceRow]) {}

    /// The tick's travel-time aggregates.
    fn on_travel_times(&mut self, _segments: &[SegmentTravelTimeRow], _links: &[LinkTravelTimeRow]) {
    }

    /// After the final barrier cycle, before workers are joined.
    fn on_sim_end(&mut self, _now: Timeslice) {}
}

/// A [`SimObserver`] that does nothing.
pub struct NoopObserver;

impl SimObserver for NoopObserver {}
