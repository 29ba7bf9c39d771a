//! Unit tests for mts-net.

use mts_core::{EntityId, LaneId, NodeId, Point};

use crate::{AuraManager, Lane, NetError, RoadNetworkBuilder, link_path, segment_path};

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Four nodes in a line, three one-segment links: 0 → 1 → 2 → 3.
fn line_network() -> crate::RoadNetwork {
    let mut b = RoadNetworkBuilder::new();
    let nodes: Vec<NodeId> =
        (0..4i64).map(|i| b.add_node(Point::new(i * 100_000, 0))).collect();
    for w in nodes.windows(2) {
        let link = b.add_link(w[0], w[1]);
        b.add_segment(link, 100_000, 700, 13.9, vec![Lane::vehicle(350)]);
    }
    b.build().unwrap()
}

// ── Builder validation ────────────────────────────────────────────────────────

#[cfg(test)]
mod builder {
    use super::*;

    #[test]
    fn builds_line_and_derives_topology() {
        let net = line_network();
        assert_eq!(net.node_count(), 4);
        assert_eq!(net.link_count(), 3);
        assert_eq!(net.segment_count(), 3);

        // Node 1 has one incoming (0→1) and one outgoing (1→2) link.
        assert_eq!(net.incoming_links(NodeId(1)).len(), 1);
        assert_eq!(net.outgoing_links(NodeId(1)).len(), 1);
        // Terminal nodes.
        assert!(net.incoming_links(NodeId(0)).is_empty());
        assert!(net.outgoing_links(NodeId(3)).is_empty());
    }

    #[test]
    fn empty_link_rejected() {
        let mut b = RoadNetworkBuilder::new();
        let a = b.add_node(Point::new(0, 0));
        let c = b.add_node(Point::new(1000, 0));
        b.add_link(a, c); // never given a segment
        assert!(matches!(b.build(), Err(NetError::EmptyLink(_))));
    }

    #[test]
    fn segment_without_lanes_rejected() {
        let mut b = RoadNetworkBuilder::new();
        let a = b.add_node(Point::new(0, 0));
        let c = b.add_node(Point::new(1000, 0));
        let link = b.add_link(a, c);
        b.add_segment(link, 1000, 700, 10.0, vec![]);
        assert!(matches!(b.build(), Err(NetError::NoLanes { .. })));
    }

    #[test]
    fn connector_to_unknown_lane_rejected() {
        let mut b = RoadNetworkBuilder::new();
        let a = b.add_node(Point::new(0, 0));
        let c = b.add_node(Point::new(1000, 0));
        let link = b.add_link(a, c);
        let seg = b.add_segment(link, 1000, 700, 10.0, vec![Lane::vehicle(350)]);
        // Lane index 5 does not exist on a one-lane segment.
        b.add_lane_connector(c, LaneId::new(seg, 0), LaneId::new(seg, 5));
        assert!(matches!(b.build(), Err(NetError::UnknownLane(_))));
    }

    #[test]
    fn bus_stop_outside_segment_rejected() {
        let mut b = RoadNetworkBuilder::new();
        let a = b.add_node(Point::new(0, 0));
        let c = b.add_node(Point::new(1000, 0));
        let link = b.add_link(a, c);
        let seg = b.add_segment(link, 1000, 700, 10.0, vec![Lane::vehicle(350)]);
        b.add_bus_stop(seg, 5000);
        assert!(matches!(b.build(), Err(NetError::BusStopOutsideSegment { .. })));
    }

    #[test]
    fn capacity_scales_with_length_and_lanes() {
        let net = line_network();
        let seg = net.segment(net.link(net.incoming_links(NodeId(1))[0]).entry_segment());
        // 100 000 cm × 1 lane / 750 cm per PCU = 133.
        assert_eq!(seg.capacity_pcu(), 133);
    }

    #[test]
    fn position_on_segment_interpolates() {
        let net = line_network();
        let link = net.incoming_links(NodeId(1))[0];
        let seg = net.link(link).entry_segment();
        let start = net.position_on_segment(seg, 0);
        let end = net.position_on_segment(seg, 100_000);
        assert_eq!(start, Point::new(0, 0));
        assert_eq!(end, Point::new(100_000, 0));
        let mid = net.position_on_segment(seg, 50_000);
        assert!((mid.x_cm - 50_000).abs() <= 1);
    }
}

// ── Path derivation ───────────────────────────────────────────────────────────

#[cfg(test)]
mod paths {
    use super::*;

    #[test]
    fn finds_chain_of_links() {
        let net = line_network();
        let path = link_path(&net, NodeId(0), NodeId(3)).unwrap();
        assert_eq!(path.len(), 3);
        // Links must connect end to end.
        for w in path.windows(2) {
            assert_eq!(net.link(w[0]).end, net.link(w[1]).start);
        }
        let segs = segment_path(&net, NodeId(0), NodeId(3)).unwrap();
        assert_eq!(segs.len(), 3);
    }

    #[test]
    fn same_node_is_empty_path() {
        let net = line_network();
        assert!(link_path(&net, NodeId(2), NodeId(2)).unwrap().is_empty());
    }

    #[test]
    fn unreachable_destination_errors() {
        // Links are directed: 3 → 0 has no route in the line network.
        let net = line_network();
        assert!(matches!(
            link_path(&net, NodeId(3), NodeId(0)),
            Err(NetError::NoRoute { .. })
        ));
    }
}

// ── Aura queries ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod aura {
    use super::*;

    fn populated() -> AuraManager {
        let aura = AuraManager::new();
        aura.rebuild(vec![
            (EntityId(1), Point::new(0, 0)),
            (EntityId(2), Point::new(500, 500)),
            (EntityId(3), Point::new(1000, 1000)),
            (EntityId(4), Point::new(-200, 900)),
        ]);
        aura
    }

    #[test]
    fn rect_query_is_inclusive_of_boundary() {
        let aura = populated();
        let mut hits =
            aura.agents_in_rect(Point::new(0, 0), Point::new(1000, 1000), None);
        hits.sort();
        assert_eq!(hits, vec![EntityId(1), EntityId(2), EntityId(3)]);
    }

    #[test]
    fn exclude_is_honoured() {
        let aura = populated();
        let hits = aura.agents_in_rect(
            Point::new(0, 0),
            Point::new(1000, 1000),
            Some(EntityId(2)),
        );
        assert!(!hits.contains(&EntityId(2)));
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn rebuild_replaces_snapshot() {
        let aura = populated();
        aura.rebuild(vec![(EntityId(9), Point::new(10, 10))]);
        assert_eq!(aura.len(), 1);
        let hits =
            aura.agents_in_rect(Point::new(0, 0), Point::new(20, 20), None);
        assert_eq!(hits, vec![EntityId(9)]);
    }
}
