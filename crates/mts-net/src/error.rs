use thiserror::Error;

use mts_core::{LaneId, LinkId, NodeId, SegmentId};

#[derive(Debug, Error)]
pub enum NetError {
    #[error("node {0} does not exist")]
    UnknownNode(NodeId),

    #[error("link {0} does not exist")]
    UnknownLink(LinkId),

    #[error("segment {0} does not exist")]
    UnknownSegment(SegmentId),

    #[error("link {0} has no segments")]
    EmptyLink(LinkId),

    #[error("lane connector references unknown lane {0}")]
    UnknownLane(LaneId),

    #[error("segment {segment} has no lanes")]
    NoLanes { segment: SegmentId },

    #[error("bus stop offset {offset_cm}cm outside segment {segment} ({length_cm}cm long)")]
    BusStopOutsideSegment { segment: SegmentId, offset_cm: i64, length_cm: i64 },

    #[error("no route from {from} to {to}")]
    NoRoute { from: NodeId, to: NodeId },
}

pub type NetResult<T> = Result<T, NetError>;
