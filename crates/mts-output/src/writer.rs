//! The `OutputWriter` trait implemented by all backend writers.

use thiserror::Error;

use crate::row::{LinkTravelTimeRow, SegmentTravelTimeRow, TraceRow};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type OutputResult<T> = Result<T, OutputError>;

/// Backend sink for the kernel's per-tick record batches.
pub trait OutputWriter: Send {
    /// Write a batch of trace records.
    fn write_traces(&mut self, rows: &[TraceRow]) -> OutputResult<()>;

    /// Write a batch of per-segment travel-time records.
    fn write_segment_times(&mut self, rows: &[SegmentTravelTimeRow]) -> OutputResult<()>;

    /// Write a batch of per-link travel-time records.
    fn write_link_times(&mut self, rows: &[LinkTravelTimeRow]) -> OutputResult<()>;

    /// Flush and close all underlying handles.
    ///
    /// Idempotent — safe to call more than once.
    fn finish(&mut self) -> OutputResult<()>;
}

/// An [`OutputWriter`] that discards everything.  Use when only observer
/// callbacks are wanted.
#[derive(Default)]
pub struct NullWriter;

impl OutputWriter for NullWriter {
    fn write_traces(&mut self, _rows: &[TraceRow]) -> OutputResult<()> {
        Ok(())
    }

    fn write_segment_times(&mut self, _rows: &[SegmentTravelTimeRow]) -> OutputResult<()> {
        Ok(())
    }

    fn write_link_times(&mut self, _rows: &[LinkTravelTimeRow]) -> OutputResult<()> {
        Ok(())
    }

    fn finish(&mut self) -> OutputResult<()> {
        Ok(())
    }
}
