//! Kernel error base type.
//!
//! Sub-crates define their own error enums and either convert into `MtsError`
//! via `From` impls or wrap it as one variant.  Both patterns are acceptable;
//! prefer whichever keeps error sites clean.

use thiserror::Error;

use crate::{EntityId, NodeId, SegmentId};

/// The top-level error type for `mts-core` and a common base for sub-crates.
#[derive(Debug, Error)]
pub enum MtsError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("entity {0} not found")]
    EntityNotFound(EntityId),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("segment {0} not found")]
    SegmentNotFound(SegmentId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shorthand result type for all `mts-*` crates.
pub type MtsResult<T> = Result<T, MtsError>;
