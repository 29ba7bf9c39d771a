//! Link-level path derivation.
//!
//! The kernel does not ship a real router — route choice is a collaborator.
//! What it does need is a way to turn `(origin, destination)` pairs from trip
//! specs into concrete segment chains, so tests and demos can build trip
//! chains without hand-listing segments.  BFS by link hop count is exactly
//! enough for that.

use std::collections::VecDeque;

use mts_core::{LinkId, NodeId, SegmentId};

use crate::error::{NetError, NetResult};
use crate::network::RoadNetwork;

/// Shortest link path (by hop count) from `from` to `to`.
///
/// Returns an empty path when `from == to`.
pub fn link_path(net: &RoadNetwork, from: NodeId, to: NodeId) -> NetResult<Vec<LinkId>> {
    if from.index() >= net.node_count() {
        return Err(NetError::UnknownNode(from));
    }
    if to.index() >= net.node_count() {
        return Err(NetError::UnknownNode(to));
    }
    if from == to {
        return Ok(Vec::new());
    }

    // prev[n] = link used to reach node n.
    let mut prev: Vec<Option<LinkId>> = vec![None; net.node_count()];
    let mut queue = VecDeque::from([from]);

    'search: while let Some(node) = queue.pop_front() {
        for &link_id in net.outgoing_links(node) {
            let next = net.link(link_id).end;
            if next != from && prev[next.index()].is_none() {
                prev[next.index()] = Some(link_id);
                if next == to {
                    break 'search;
                }
                queue.push_back(next);
            }
        }
    }

    let mut path = Vec::new();
    let mut node = to;
    while node != from {
        let Some(link_id) = prev[node.index()] else {
            return Err(NetError::NoRoute { from, to });
        };
        path.push(link_id);
        node = net.link(link_id).start;
    }
    path.reverse();
    Ok(path)
}

/// The full ordered segment chain of [`link_path`].
pub fn segment_path(net: &RoadNetwork, from: NodeId, to: NodeId) -> NetResult<Vec<SegmentId>> {
    let links = link_path(net, from, to)?;
    Ok(links
        .into_iter()
        .flat_map(|l| net.link(l).segments.iter().copied())
        .collect())
}
