//! Trip chains: the ordered day plan a person works through.

use mts_core::{BusStopId, NodeId, SegmentId};

// ── TravelMode ────────────────────────────────────────────────────────────────

/// How a sub-trip is travelled.  Determines which role is instantiated.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TravelMode {
    /// Drive the segment path (role: Driver).
    Car,
    /// Drive the segment path serving stops (role: BusDriver).
    BusService,
    /// Wait at a stop, ride a bus, alight (roles: WaitBusActivity → Passenger).
    Bus,
    /// Walk point to point, off the carriageway (role: Pedestrian).
    Walk,
    /// Ride rail; modelled as a timed teleport (role: Passenger).
    Mrt,
}

// ── Items ─────────────────────────────────────────────────────────────────────

/// One movement leg of a trip chain.
#[derive(Clone, Debug)]
pub struct SubTrip {
    pub mode: TravelMode,
    pub origin: NodeId,
    pub destination: NodeId,
    /// Ordered segments origin → destination.  Required for `Car` and
    /// `BusService`; ignored for the other modes.
    pub segment_path: Vec<SegmentId>,
    /// Where to wait for the bus (`Bus` mode).
    pub board_stop: Option<BusStopId>,
    /// Where to leave the bus (`Bus` mode).
    pub alight_stop: Option<BusStopId>,
    /// Stops a `BusService` driver serves, in path order.
    pub serve_stops: Vec<BusStopId>,
    /// Ride duration for `Mrt` legs.
    pub ride_ms: u64,
    /// Fixed walking speed for `Walk` legs; drawn from the person's RNG when
    /// absent.
    pub walk_speed_mps: Option<f64>,
}

impl SubTrip {
    /// A plain car leg.
    pub fn car(origin: NodeId, destination: NodeId, segment_path: Vec<SegmentId>) -> Self {
        Self {
            mode: TravelMode::Car,
            origin,
            destination,
            segment_path,
            board_stop: None,
            alight_stop: None,
            serve_stops: Vec::new(),
            ride_ms: 0,
            walk_speed_mps: None,
        }
    }

    /// A walking leg.
    pub fn walk(origin: NodeId, destination: NodeId) -> Self {
        Self {
            mode: TravelMode::Walk,
            origin,
            destination,
            segment_path: Vec::new(),
            board_stop: None,
            alight_stop: None,
            serve_stops: Vec::new(),
            ride_ms: 0,
            walk_speed_mps: None,
        }
    }
}

/// One entry of a trip chain: move somewhere, or stay put for a while.
#[derive(Clone, Debug)]
pub enum TripItem {
    Trip(SubTrip),
    /// Perform an activity at `at` for `duration_ms`.
    Activity { at: NodeId, duration_ms: u64 },
}

// ── TripChain ─────────────────────────────────────────────────────────────────

/// The ordered list of trip items a person advances through, one at a time.
#[derive(Clone, Debug)]
pub struct TripChain {
    items: Vec<TripItem>,
    cursor: usize,
}

impl TripChain {
    pub fn new(items: Vec<TripItem>) -> Self {
        Self { items, cursor: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// The item currently being performed, or `None` once exhausted.
    pub fn current(&self) -> Option<&TripItem> {
        self.items.get(self.cursor)
    }

    /// Advance to the next item and return it, or `None` when the chain is
    /// finished.
    pub fn advance(&mut self) -> Option<&TripItem> {
        self.cursor += 1;
        self.items.get(self.cursor)
    }

    /// Items completed so far.
    pub fn completed(&self) -> usize {
        self.cursor.min(self.items.len())
    }
}
