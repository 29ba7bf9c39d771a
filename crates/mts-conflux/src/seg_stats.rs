//! Lane-level queueing state for one road segment, and the conflux-wide
//! supply map that implements the movement admission interface.

use std::cell::RefCell;
use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use mts_core::{BusStopId, EntityId, LaneId, LinkId, SegmentId};
use mts_net::RoadSegment;
use mts_person::{Person, SegmentAdmission};

// ── LaneStats ─────────────────────────────────────────────────────────────────

/// One lane's ordered person queue plus its discharge bookkeeping.
///
/// The queue is kept sorted by distance to the segment end, ascending —
/// front = closest to the intersection.
pub struct LaneStats {
    queue: VecDeque<Box<Person>>,
    /// Vehicles this lane may discharge per tick.
    pub output_flow_per_tick: f64,
    default_output_flow: f64,
    /// Fractional discharge allowance carried across ticks, capped so an
    /// empty road cannot bank an unbounded burst.
    allowance: f64,
    /// Vehicles that have left through the downstream end, cumulative.
    pub cumulative_output: u64,
}

impl LaneStats {
    fn new(output_flow_per_tick: f64) -> Self {
        Self {
            queue: VecDeque::new(),
            output_flow_per_tick,
            default_output_flow: output_flow_per_tick,
            allowance: 1.0_f64.max(output_flow_per_tick),
            cumulative_output: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.queue.len()
    }

    pub fn queuing_count(&self) -> usize {
        self.queue.iter().filter(|p| p.core.is_queuing).count()
    }

    pub fn moving_count(&self) -> usize {
        self.count() - self.queuing_count()
    }

    /// Insert keeping the (distance, id) order.
    fn insert(&mut self, person: Box<Person>) {
        let key = (person.core.distance_to_seg_end_cm, person.core.id);
        let pos = self
            .queue
            .iter()
            .position(|p| (p.core.distance_to_seg_end_cm, p.core.id) > key)
            .unwrap_or(self.queue.len());
        self.queue.insert(pos, person);
    }

    fn take(&mut self, id: EntityId) -> Option<Box<Person>> {
        let pos = self.queue.iter().position(|p| p.core.id == id)?;
        self.queue.remove(pos)
    }

    fn front_unticked(&self, frame: u64) -> Option<&Person> {
        self.queue.iter().find(|p| p.core.last_ticked_frame != Some(frame)).map(|b| &**b)
    }

    fn refresh_allowance(&mut self) {
        let cap = 1.0_f64.max(self.output_flow_per_tick);
        self.allowance = (self.allowance + self.output_flow_per_tick).min(cap);
    }

    fn try_discharge(&mut self) -> bool {
        if self.allowance >= 1.0 {
            self.allowance -= 1.0;
            self.cumulative_output += 1;
            true
        } else {
            false
        }
    }
}

// ── SegmentStats ──────────────────────────────────────────────────────────────

/// The queueing state of one road segment: physical lanes plus the
/// lane-infinity holding area for persons admitted to the segment but not
/// yet to a lane.
pub struct SegmentStats {
    pub segment: SegmentId,
    pub link: LinkId,
    pub length_cm: i64,
    capacity_pcu: usize,
    lanes: Vec<LaneStats>,
    lane_infinity: LaneStats,
    /// Persons admitted this tick (from virtual queues and staging).
    pub accepted_flow: u32,
    pub free_flow_speed_mps: f64,
    pub bus_stops: Vec<BusStopId>,
    /// Set while an incident overrides the lane flow rates.
    incident_active: bool,
}

impl SegmentStats {
    pub fn new(seg: &RoadSegment, base_gran_ms: u32) -> Self {
        let per_lane_flow = seg.default_lane_output_per_tick(base_gran_ms);
        Self {
            segment: seg.id,
            link: seg.link,
            length_cm: seg.length_cm,
            capacity_pcu: seg.capacity_pcu(),
            lanes: seg.lanes.iter().map(|_| LaneStats::new(per_lane_flow)).collect(),
            lane_infinity: LaneStats::new(per_lane_flow),
            accepted_flow: 0,
            free_flow_speed_mps: seg.max_speed_mps,
            bus_stops: seg.bus_stops.clone(),
            incident_active: false,
        }
    }

    /// Total persons on this segment.  Always equals the sum over all lanes
    /// (including lane infinity).
    pub fn count(&self) -> usize {
        self.lanes.iter().map(LaneStats::count).sum::<usize>() + self.lane_infinity.count()
    }

    pub fn queuing_count(&self) -> usize {
        self.lanes.iter().map(LaneStats::queuing_count).sum::<usize>()
            + self.lane_infinity.queuing_count()
    }

    pub fn moving_count(&self) -> usize {
        self.count() - self.queuing_count()
    }

    pub fn capacity_pcu(&self) -> usize {
        self.capacity_pcu
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn can_accommodate(&self) -> bool {
        self.count() < self.capacity_pcu
    }

    pub fn incident_active(&self) -> bool {
        self.incident_active
    }

    /// Per-tick supply reset: refresh discharge allowances, clear admission
    /// counters.
    pub fn reset_tick(&mut self) {
        for lane in &mut self.lanes {
            lane.refresh_allowance();
        }
        self.lane_infinity.refresh_allowance();
        self.accepted_flow = 0;
    }

    /// Insert `person` according to its placement (`core.lane`).
    pub fn insert(&mut self, person: Box<Person>) {
        debug_assert_eq!(person.core.segment, self.segment);
        let lane = person.core.lane;
        if lane == LaneId::INFINITY || lane as usize >= self.lanes.len() {
            self.lane_infinity.insert(person);
        } else {
            self.lanes[lane as usize].insert(person);
        }
    }

    /// Remove the person with `id` from lane `lane`.
    pub fn take(&mut self, lane: u16, id: EntityId) -> Option<Box<Person>> {
        if lane == LaneId::INFINITY || lane as usize >= self.lanes.len() {
            self.lane_infinity.take(id)
        } else {
            self.lanes[lane as usize].take(id)
        }
    }

    /// The frontmost person not yet ticked in `frame`, across all lanes:
    /// minimum (distance to end, id).
    pub fn front_unticked(&self, frame: u64) -> Option<(u16, EntityId, i64)> {
        let mut best: Option<(u16, EntityId, i64)> = None;
        let mut consider = |lane_idx: u16, lane: &LaneStats| {
            if let Some(p) = lane.front_unticked(frame) {
                let entry = (lane_idx, p.core.id, p.core.distance_to_seg_end_cm);
                match best {
                    Some((_, bid, bdist)) if (bdist, bid) <= (entry.2, entry.1) => {}
                    _ => best = Some(entry),
                }
            }
        };
        for (i, lane) in self.lanes.iter().enumerate() {
            consider(i as u16, lane);
        }
        consider(LaneId::INFINITY, &self.lane_infinity);
        best
    }

    /// Least-occupied physical lane — where a vehicle leaving lane infinity
    /// goes.
    pub fn least_occupied_lane(&self) -> u16 {
        self.lanes
            .iter()
            .enumerate()
            .min_by_key(|(_, l)| l.count())
            .map(|(i, _)| i as u16)
            .unwrap_or(0)
    }

    /// Force every lane's output flow to `flow_per_tick` (incident).
    pub fn set_incident(&mut self, flow_per_tick: f64) {
        self.incident_active = true;
        for lane in &mut self.lanes {
            lane.output_flow_per_tick = flow_per_tick;
            lane.allowance = lane.allowance.min(1.0_f64.max(flow_per_tick));
        }
        self.lane_infinity.output_flow_per_tick = flow_per_tick;
    }

    /// Restore default flow rates after an incident clears.
    pub fn clear_incident(&mut self) {
        self.incident_active = false;
        for lane in self.lanes.iter_mut().chain(Some(&mut self.lane_infinity)) {
            lane.output_flow_per_tick = lane.default_output_flow;
        }
    }

    fn try_discharge_lane(&mut self, lane: u16) -> bool {
        if self.incident_active && self.lanes.iter().all(|l| l.output_flow_per_tick == 0.0) {
            return false;
        }
        if lane == LaneId::INFINITY || lane as usize >= self.lanes.len() {
            self.lane_infinity.try_discharge()
        } else {
            self.lanes[lane as usize].try_discharge()
        }
    }

    /// Visit every person on this segment.
    pub fn for_each_person(&self, mut f: impl FnMut(&Person)) {
        for lane in self.lanes.iter().chain(Some(&self.lane_infinity)) {
            for p in &lane.queue {
                f(p);
            }
        }
    }

    /// Persons ordered front-first (ascending distance to end), merged
    /// across lanes.
    pub fn ordered_ids(&self) -> Vec<(EntityId, i64)> {
        let mut all: Vec<(EntityId, i64)> = Vec::with_capacity(self.count());
        self.for_each_person(|p| all.push((p.core.id, p.core.distance_to_seg_end_cm)));
        all.sort_unstable_by_key(|(id, dist)| (*dist, *id));
        all
    }
}

// ── SupplyMap ─────────────────────────────────────────────────────────────────

/// All segment stats a conflux owns, behind a `RefCell` so movement code can
/// query admission through a shared reference while the conflux drives the
/// update.  Borrows are strictly scoped to single calls; nothing re-enters.
pub struct SupplyMap {
    inner: RefCell<FxHashMap<SegmentId, SegmentStats>>,
}

impl SupplyMap {
    pub fn new(stats: impl IntoIterator<Item = SegmentStats>) -> Self {
        Self {
            inner: RefCell::new(stats.into_iter().map(|s| (s.segment, s)).collect()),
        }
    }

    pub fn owns(&self, segment: SegmentId) -> bool {
        self.inner.borrow().contains_key(&segment)
    }

    /// Run `f` against one segment's stats.
    pub fn with<R>(&self, segment: SegmentId, f: impl FnOnce(&SegmentStats) -> R) -> Option<R> {
        self.inner.borrow().get(&segment).map(f)
    }

    /// Run `f` against one segment's stats, mutably.
    pub fn with_mut<R>(
        &self,
        segment: SegmentId,
        f: impl FnOnce(&mut SegmentStats) -> R,
    ) -> Option<R> {
        self.inner.borrow_mut().get_mut(&segment).map(f)
    }

    /// Run `f` over every owned stats, mutably.
    pub fn for_each_mut(&self, mut f: impl FnMut(&mut SegmentStats)) {
        for stats in self.inner.borrow_mut().values_mut() {
            f(stats);
        }
    }

    pub fn insert_person(&self, person: Box<Person>) {
        let seg = person.core.segment;
        let mut inner = self.inner.borrow_mut();
        let stats = inner.get_mut(&seg).expect("insert into unowned segment");
        stats.insert(person);
    }

    pub fn take_person(&self, segment: SegmentId, lane: u16, id: EntityId) -> Option<Box<Person>> {
        self.inner.borrow_mut().get_mut(&segment)?.take(lane, id)
    }

    /// Total persons across all owned segments.
    pub fn person_count(&self) -> usize {
        self.inner.borrow().values().map(SegmentStats::count).sum()
    }
}

impl SegmentAdmission for SupplyMap {
    fn can_accept(&self, segment: SegmentId) -> bool {
        self.with(segment, SegmentStats::can_accommodate).unwrap_or(false)
    }

    fn try_discharge(&self, lane: LaneId) -> bool {
        self.with_mut(lane.segment, |s| s.try_discharge_lane(lane.index)).unwrap_or(false)
    }

    fn pick_lane(&self, segment: SegmentId) -> u16 {
        self.with(segment, SegmentStats::least_occupied_lane).unwrap_or(0)
    }
}
