//! The per-tick collection hub between worker threads and the main thread.

use std::sync::Mutex;

use mts_core::{EntityId, Point};

use crate::row::{LinkTravelTimeRow, SegmentTravelTimeRow, TraceRow};

/// Where confluxes deposit rows and position snapshots during a tick.
///
/// Pushes happen on worker threads (one coarse lock per conflux per tick,
/// batched); drains happen on the main thread between barriers, so pushes
/// and drains never contend for long.
#[derive(Default)]
pub struct OutputHub {
    traces: Mutex<Vec<TraceRow>>,
    segment_times: Mutex<Vec<SegmentTravelTimeRow>>,
    link_times: Mutex<Vec<LinkTravelTimeRow>>,
    /// Committed positions of all live persons, refreshed each tick — the
    /// aura manager's rebuild snapshot.
    positions: Mutex<Vec<(EntityId, Point)>>,
}

impl OutputHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_traces(&self, mut rows: Vec<TraceRow>) {
        if rows.is_empty() {
            return;
        }
        self.traces.lock().expect("hub lock poisoned").append(&mut rows);
    }

    pub fn push_segment_times(&self, mut rows: Vec<SegmentTravelTimeRow>) {
        if rows.is_empty() {
            return;
        }
        self.segment_times.lock().expect("hub lock poisoned").append(&mut rows);
    }

    pub fn push_link_times(&self, mut rows: Vec<LinkTravelTimeRow>) {
        if rows.is_empty() {
            return;
        }
        self.link_times.lock().expect("hub lock poisoned").append(&mut rows);
    }

    pub fn push_positions(&self, mut positions: Vec<(EntityId, Point)>) {
        if positions.is_empty() {
            return;
        }
        self.positions.lock().expect("hub lock poisoned").append(&mut positions);
    }

    pub fn drain_traces(&self) -> Vec<TraceRow> {
        std::mem::take(&mut *self.traces.lock().expect("hub lock poisoned"))
    }

    pub fn drain_segment_times(&self) -> Vec<SegmentTravelTimeRow> {
        std::mem::take(&mut *self.segment_times.lock().expect("hub lock poisoned"))
    }

    pub fn drain_link_times(&self) -> Vec<LinkTravelTimeRow> {
        std::mem::take(&mut *self.link_times.lock().expect("hub lock poisoned"))
    }

    pub fn drain_positions(&self) -> Vec<(EntityId, Point)> {
        std::mem::take(&mut *self.positions.lock().expect("hub lock poisoned"))
    }
}
