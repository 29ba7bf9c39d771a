use thiserror::Error;

use mts_core::{EntityId, NodeId, SegmentId};

/// Per-person failures.  These retire the person with a logged explanation;
/// they never abort the run.
#[derive(Debug, Error)]
pub enum PersonError {
    #[error("person {person}: trip chain is empty")]
    EmptyTripChain { person: EntityId },

    #[error("person {person}: sub-trip from {from} to {to} has no road path")]
    MissingPath { person: EntityId, from: NodeId, to: NodeId },

    #[error("person {person}: path references unknown segment {segment}")]
    UnknownSegment { person: EntityId, segment: SegmentId },

    #[error("person {person}: bus sub-trip lacks a boarding stop")]
    MissingBoardStop { person: EntityId },
}

pub type PersonResult<T> = Result<T, PersonError>;
