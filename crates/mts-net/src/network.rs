//! Road network representation and builder.
//!
//! # Data layout
//!
//! Nodes, links, and segments live in arenas indexed by their typed ids, so
//! cross-references are indices rather than pointers (which is also what lets
//! persons carry `(SegmentId, LaneId)` placements instead of borrows).  Each
//! link owns an ordered chain of segments, upstream → downstream; per-node
//! incoming/outgoing link lists are derived at build time for O(1) topology
//! queries during conflux construction.
//!
//! All geometry is integer centimetres ([`Point`]), speeds f64 m/s.

use mts_core::{BusStopId, LaneId, LinkId, NodeId, Point, SegmentId};

use crate::error::{NetError, NetResult};

/// Road space one passenger-car unit occupies (vehicle plus headway), used to
/// derive segment storage capacity from its physical dimensions.
pub const VEHICLE_FOOTPRINT_CM: i64 = 750;

// ── Node ──────────────────────────────────────────────────────────────────────

/// An intersection or dead end.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Node {
    pub id: NodeId,
    pub location: Point,
}

// ── Lane ──────────────────────────────────────────────────────────────────────

/// One lane of a road segment: width, turn permissions, and type flags.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Lane {
    pub width_cm: i64,
    pub can_go_straight: bool,
    pub can_turn_left: bool,
    pub can_turn_right: bool,
    pub is_bus_lane: bool,
    pub is_pedestrian: bool,
}

impl Lane {
    /// A plain all-movements vehicle lane, the common case in tests.
    pub fn vehicle(width_cm: i64) -> Self {
        Self {
            width_cm,
            can_go_straight: true,
            can_turn_left: true,
            can_turn_right: true,
            is_bus_lane: false,
            is_pedestrian: false,
        }
    }
}

// ── BusStop ───────────────────────────────────────────────────────────────────

/// A bus stop placed `offset_cm` from the upstream end of its segment.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BusStop {
    pub id: BusStopId,
    pub segment: SegmentId,
    pub offset_cm: i64,
}

// ── RoadSegment ───────────────────────────────────────────────────────────────

/// One homogeneous stretch of road within a link.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoadSegment {
    pub id: SegmentId,
    pub link: LinkId,
    /// Position of this segment within its link's chain (0 = most upstream).
    pub position_in_link: u16,
    pub length_cm: i64,
    pub width_cm: i64,
    pub max_speed_mps: f64,
    pub lanes: Vec<Lane>,
    /// Bus stops on this segment, ordered by offset.
    pub bus_stops: Vec<BusStopId>,
}

impl RoadSegment {
    /// Storage capacity in passenger-car units, derived from length × lanes.
    /// Never less than 1 so a degenerate segment can still pass one vehicle.
    pub fn capacity_pcu(&self) -> usize {
        let raw = self.length_cm * self.lanes.len() as i64 / VEHICLE_FOOTPRINT_CM;
        raw.max(1) as usize
    }

    /// Vehicles one lane may discharge per tick at the given granularity.
    ///
    /// The default supply model discharges at saturation flow of one vehicle
    /// per lane per 2 s of green-equivalent time.
    pub fn default_lane_output_per_tick(&self, base_gran_ms: u32) -> f64 {
        base_gran_ms as f64 / 2000.0
    }
}

// ── Link ──────────────────────────────────────────────────────────────────────

/// A directed link: an ordered chain of road segments between two nodes.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Link {
    pub id: LinkId,
    pub start: NodeId,
    pub end: NodeId,
    /// Segments upstream → downstream.  Never empty after `build()`.
    pub segments: Vec<SegmentId>,
}

impl Link {
    /// The segment a person entering this link is admitted to.
    pub fn entry_segment(&self) -> SegmentId {
        self.segments[0]
    }

    /// The segment adjacent to the link's downstream intersection.
    pub fn exit_segment(&self) -> SegmentId {
        *self.segments.last().expect("link validated non-empty")
    }
}

// ── LaneConnector ─────────────────────────────────────────────────────────────

/// A permitted lane-to-lane movement across an intersection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaneConnector {
    pub from: LaneId,
    pub to: LaneId,
}

// ── RoadNetwork ───────────────────────────────────────────────────────────────

/// The immutable road network: arenas plus derived per-node topology.
///
/// Construct via [`RoadNetworkBuilder`]; `build()` validates referential
/// integrity once so runtime code can index without checking.
#[derive(Debug)]
pub struct RoadNetwork {
    nodes: Vec<Node>,
    links: Vec<Link>,
    segments: Vec<RoadSegment>,
    bus_stops: Vec<BusStop>,

    /// Links terminating at each node — the upstream set a conflux owns.
    incoming: Vec<Vec<LinkId>>,
    /// Links departing each node.
    outgoing: Vec<Vec<LinkId>>,
    /// Lane connectors grouped by intersection node.
    connectors: Vec<Vec<LaneConnector>>,
}

impl RoadNetwork {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn bus_stop_count(&self) -> usize {
        self.bus_stops.len()
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn link(&self, id: LinkId) -> &Link {
        &self.links[id.index()]
    }

    #[inline]
    pub fn segment(&self, id: SegmentId) -> &RoadSegment {
        &self.segments[id.index()]
    }

    #[inline]
    pub fn bus_stop(&self, id: BusStopId) -> &BusStop {
        &self.bus_stops[id.index()]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn try_segment(&self, id: SegmentId) -> NetResult<&RoadSegment> {
        self.segments.get(id.index()).ok_or(NetError::UnknownSegment(id))
    }

    /// Links whose downstream end is `node`.
    #[inline]
    pub fn incoming_links(&self, node: NodeId) -> &[LinkId] {
        &self.incoming[node.index()]
    }

    /// Links whose upstream end is `node`.
    #[inline]
    pub fn outgoing_links(&self, node: NodeId) -> &[LinkId] {
        &self.outgoing[node.index()]
    }

    /// Lane connectors of the intersection at `node`.
    #[inline]
    pub fn connectors_at(&self, node: NodeId) -> &[LaneConnector] {
        &self.connectors[node.index()]
    }

    /// Interpolated position `offset_cm` along a segment (straight line from
    /// the link's start node toward its end node, apportioned by chain
    /// position).  Good enough for trace output; exact polylines are a
    /// collaborator concern.
    pub fn position_on_segment(&self, segment: SegmentId, offset_cm: i64) -> Point {
        let seg = self.segment(segment);
        let link = self.link(seg.link);
        let from = self.node(link.start).location;
        let to = self.node(link.end).location;

        let chain_len: i64 = link.segments.iter().map(|s| self.segment(*s).length_cm).sum();
        let upstream_len: i64 = link.segments[..seg.position_in_link as usize]
            .iter()
            .map(|s| self.segment(*s).length_cm)
            .sum();
        let along = (upstream_len + offset_cm.clamp(0, seg.length_cm)) as f64
            / chain_len.max(1) as f64;
        let total = from.distance_cm(to);
        from.step_towards(to, (total * along) as i64)
    }
}

// ── RoadNetworkBuilder ────────────────────────────────────────────────────────

/// Construct a [`RoadNetwork`] incrementally, then call [`build`](Self::build).
///
/// # Example
///
/// ```
/// use mts_core::Point;
/// use mts_net::{Lane, RoadNetworkBuilder};
///
/// let mut b = RoadNetworkBuilder::new();
/// let a = b.add_node(Point::new(0, 0));
/// let c = b.add_node(Point::new(100_000, 0));
/// let link = b.add_link(a, c);
/// b.add_segment(link, 100_000, 700, 10.0, vec![Lane::vehicle(350)]);
/// let net = b.build().unwrap();
/// assert_eq!(net.link_count(), 1);
/// ```
#[derive(Default)]
pub struct RoadNetworkBuilder {
    nodes: Vec<Node>,
    links: Vec<Link>,
    segments: Vec<RoadSegment>,
    bus_stops: Vec<BusStop>,
    connectors: Vec<(NodeId, LaneConnector)>,
}

impl RoadNetworkBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, location: Point) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { id, location });
        id
    }

    /// Add a directed link from `start` to `end` with an empty segment chain.
    pub fn add_link(&mut self, start: NodeId, end: NodeId) -> LinkId {
        let id = LinkId(self.links.len() as u32);
        self.links.push(Link { id, start, end, segments: Vec::new() });
        id
    }

    /// Append a segment to `link`'s chain (upstream → downstream order).
    pub fn add_segment(
        &mut self,
        link: LinkId,
        length_cm: i64,
        width_cm: i64,
        max_speed_mps: f64,
        lanes: Vec<Lane>,
    ) -> SegmentId {
        let id = SegmentId(self.segments.len() as u32);
        let position_in_link = self.links[link.index()].segments.len() as u16;
        self.segments.push(RoadSegment {
            id,
            link,
            position_in_link,
            length_cm,
            width_cm,
            max_speed_mps,
            lanes,
            bus_stops: Vec::new(),
        });
        self.links[link.index()].segments.push(id);
        id
    }

    pub fn add_bus_stop(&mut self, segment: SegmentId, offset_cm: i64) -> BusStopId {
        let id = BusStopId(self.bus_stops.len() as u32);
        self.bus_stops.push(BusStop { id, segment, offset_cm });
        self.segments[segment.index()].bus_stops.push(id);
        id
    }

    pub fn add_lane_connector(&mut self, node: NodeId, from: LaneId, to: LaneId) {
        self.connectors.push((node, LaneConnector { from, to }));
    }

    /// Validate and freeze the network.
    ///
    /// Checks: every link has ≥ 1 segment, every segment has ≥ 1 lane, lane
    /// connectors reference real lanes, bus stops sit inside their segment.
    pub fn build(self) -> NetResult<RoadNetwork> {
        let node_count = self.nodes.len();

        for link in &self.links {
            if link.start.index() >= node_count {
                return Err(NetError::UnknownNode(link.start));
            }
            if link.end.index() >= node_count {
                return Err(NetError::UnknownNode(link.end));
            }
            if link.segments.is_empty() {
                return Err(NetError::EmptyLink(link.id));
            }
        }
        for seg in &self.segments {
            if seg.lanes.is_empty() {
                return Err(NetError::NoLanes { segment: seg.id });
            }
        }
        for stop in &self.bus_stops {
            let seg = &self.segments[stop.segment.index()];
            if stop.offset_cm < 0 || stop.offset_cm > seg.length_cm {
                return Err(NetError::BusStopOutsideSegment {
                    segment: seg.id,
                    offset_cm: stop.offset_cm,
                    length_cm: seg.length_cm,
                });
            }
        }

        let lane_exists = |lane: LaneId| -> bool {
            self.segments
                .get(lane.segment.index())
                .is_some_and(|s| lane.is_infinity() || (lane.index as usize) < s.lanes.len())
        };

        let mut incoming = vec![Vec::new(); node_count];
        let mut outgoing = vec![Vec::new(); node_count];
        for link in &self.links {
            incoming[link.end.index()].push(link.id);
            outgoing[link.start.index()].push(link.id);
        }

        let mut connectors = vec![Vec::new(); node_count];
        for (node, conn) in self.connectors {
            if node.index() >= node_count {
                return Err(NetError::UnknownNode(node));
            }
            if !lane_exists(conn.from) {
                return Err(NetError::UnknownLane(conn.from));
            }
            if !lane_exists(conn.to) {
                return Err(NetError::UnknownLane(conn.to));
            }
            connectors[node.index()].push(conn);
        }

        Ok(RoadNetwork {
            nodes: self.nodes,
            links: self.links,
            segments: self.segments,
            bus_stops: self.bus_stops,
            incoming,
            outgoing,
            connectors,
        })
    }
}
