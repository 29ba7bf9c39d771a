//! `mts-output` — what the kernel reports and how it leaves the process.
//!
//! | Module     | Contents                                                |
//! |------------|---------------------------------------------------------|
//! | [`row`]    | `TraceRow`, `SegmentTravelTimeRow`, `LinkTravelTimeRow` |
//! | [`hub`]    | `OutputHub` — lock-guarded per-tick collection point    |
//! | [`writer`] | `OutputWriter` trait, `NullWriter`                      |
//! | [`csv`]    | CSV backend                                             |
//!
//! Confluxes produce rows on worker threads and push them into the
//! [`OutputHub`]; the main thread drains the hub once per tick (between
//! barriers) and forwards batches to an [`OutputWriter`].  Row types are
//! plain integers/floats so backends never depend on kernel internals.

pub mod csv;
pub mod hub;
pub mod row;
pub mod writer;


pub use csv::CsvWriter;
pub use hub::OutputHub;
pub use row::{LinkTravelTimeRow, SegmentTravelTimeRow, TraceRow};
pub use writer::{NullWriter, OutputError, OutputResult, OutputWriter};
