//! CSV output backend.
//!
//! Creates three files in the configured output directory:
//! - `trace.csv`
//! - `segment_travel_times.csv`
//! - `link_travel_times.csv`

use std::fs::File;
use std::path::Path;

use csv::Writer;

use crate::row::{LinkTravelTimeRow, SegmentTravelTimeRow, TraceRow};
use crate::writer::{OutputResult, OutputWriter};

/// Writes simulation output to three CSV files.
pub struct CsvWriter {
    traces: Writer<File>,
    segment_times: Writer<File>,
    link_times: Writer<File>,
    finished: bool,
}

impl CsvWriter {
    /// Open (or create) the three CSV files in `dir` and write header rows.
    pub fn new(dir: &Path) -> OutputResult<Self> {
        let mut traces = Writer::from_path(dir.join("trace.csv"))?;
        traces.write_record(["role", "entity_id", "frame", "x_cm", "y_cm", "extra"])?;

        let mut segment_times = Writer::from_path(dir.join("segment_travel_times.csv"))?;
        segment_times
            .write_record(["segment_id", "start_ms", "end_ms", "mean_travel_s", "samples"])?;

        let mut link_times = Writer::from_path(dir.join("link_travel_times.csv"))?;
        link_times.write_record(["link_id", "start_ms", "end_ms", "mean_travel_s", "samples"])?;

        Ok(Self { traces, segment_times, link_times, finished: false })
    }
}

impl OutputWriter for CsvWriter {
    fn write_traces(&mut self, rows: &[TraceRow]) -> OutputResult<()> {
        for row in rows {
            self.traces.write_record([
                row.role_tag.to_string(),
                row.entity_id.to_string(),
                row.frame.to_string(),
                row.x_cm.to_string(),
                row.y_cm.to_string(),
                row.extra.clone(),
            ])?;
        }
        Ok(())
    }

    fn write_segment_times(&mut self, rows: &[SegmentTravelTimeRow]) -> OutputResult<()> {
        for row in rows {
            self.segment_times.write_record([
                row.segment_id.to_string(),
                row.start_ms.to_string(),
                row.end_ms.to_string(),
                format!("{:.3}", row.mean_travel_s),
                row.samples.to_string(),
            ])?;
        }
        Ok(())
    }

    fn write_link_times(&mut self, rows: &[LinkTravelTimeRow]) -> OutputResult<()> {
        for row in rows {
            self.link_times.write_record([
                row.link_id.to_string(),
                row.start_ms.to_string(),
                row.end_ms.to_string(),
                format!("{:.3}", row.mean_travel_s),
                row.samples.to_string(),
            ])?;
        }
        Ok(())
    }

    fn finish(&mut self) -> OutputResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.traces.flush()?;
        self.segment_times.flush()?;
        self.link_times.flush()?;
        Ok(())
    }
}
