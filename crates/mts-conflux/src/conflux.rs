//! The conflux: one intersection's aggregate scheduler.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use mts_buffer::CellRegistration;
use mts_core::{
    CellId, ConfluxId, EntityId, LaneId, LinkId, NodeId, Point, SegmentId, Timeslice, WorkerId,
};
use mts_entity::{Entity, KernelFault, Message, TickContext, UpdateStatus};
use mts_net::RoadNetwork;
use mts_output::{LinkTravelTimeRow, OutputHub, SegmentTravelTimeRow, TraceRow};
use mts_person::{
    MoveContext, MoveOutcome, Person, PersonProps, Role, RoleKind, SegmentCrossing, TripSwitch,
};

use crate::bus_stop::BusStopAgent;
use crate::merge::top_c_merge;
use crate::seg_stats::{SegmentStats, SupplyMap};

// ── ConfluxInbox ──────────────────────────────────────────────────────────────

/// The cross-thread intake of one conflux: per-link virtual queues with their
/// per-tick admission budgets, plus the staging intake for new persons.
///
/// Written by neighbouring confluxes (between barriers, from their worker
/// threads) and by the main thread's loader; drained by the owning conflux's
/// own tick.  Every lock scope is a leaf — no callback runs under the lock.
pub struct ConfluxInbox {
    conflux: ConfluxId,
    state: Mutex<InboxState>,
}

struct InboxState {
    /// Per incoming link, in ascending `LinkId` order: arrival-order queue.
    vqs: Vec<(LinkId, VecDeque<Box<Person>>)>,
    /// Remaining admission budget per link for the current tick.  Gates both
    /// neighbour pushes and backlog admission, so total inflow per link and
    /// tick never exceeds the bound computed at tick start.
    bounds: Vec<i64>,
    /// Newly staged persons routed here by the loader.
    intake: Vec<Box<Person>>,
}

impl ConfluxInbox {
    pub fn new(conflux: ConfluxId, mut links: Vec<LinkId>) -> Self {
        links.sort_unstable();
        links.dedup();
        let bounds = vec![0; links.len()];
        Self {
            conflux,
            state: Mutex::new(InboxState {
                vqs: links.into_iter().map(|l| (l, VecDeque::new())).collect(),
                bounds,
                intake: Vec::new(),
            }),
        }
    }

    pub fn conflux(&self) -> ConfluxId {
        self.conflux
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InboxState> {
        self.state.lock().expect("conflux inbox poisoned")
    }

    /// Stage a newly started person (loader, main thread).
    pub fn stage(&self, person: Box<Person>) {
        self.lock().intake.push(person);
    }

    /// Hand a person over into `link`'s virtual queue iff the link's budget
    /// allows; the person is returned on refusal and retries next tick.
    pub fn try_hand_over(&self, link: LinkId, person: Box<Person>) -> Result<(), Box<Person>> {
        let mut state = self.lock();
        let Some(idx) = state.vqs.iter().position(|(l, _)| *l == link) else {
            return Err(person);
        };
        if state.bounds[idx] > 0 {
            state.bounds[idx] -= 1;
            state.vqs[idx].1.push_back(person);
            Ok(())
        } else {
            Err(person)
        }
    }

    /// Reset `link`'s admission budget at the start of the owning conflux's
    /// tick.
    fn set_bound(&self, link: LinkId, bound: i64) {
        let mut state = self.lock();
        if let Some(idx) = state.vqs.iter().position(|(l, _)| *l == link) {
            state.bounds[idx] = bound.max(0);
        }
    }

    /// Pop one backlog person from `link`'s queue if budget remains.
    fn admit_one(&self, link: LinkId) -> Option<Box<Person>> {
        let mut state = self.lock();
        let idx = state.vqs.iter().position(|(l, _)| *l == link)?;
        if state.bounds[idx] <= 0 {
            return None;
        }
        let person = state.vqs[idx].1.pop_front()?;
        state.bounds[idx] -= 1;
        Some(person)
    }

    fn drain_intake(&self) -> Vec<Box<Person>> {
        std::mem::take(&mut self.lock().intake)
    }

    /// Persons currently queued (virtual queues + intake).
    pub fn held_count(&self) -> usize {
        let state = self.lock();
        state.vqs.iter().map(|(_, q)| q.len()).sum::<usize>() + state.intake.len()
    }

    pub fn vq_len(&self, link: LinkId) -> usize {
        let state = self.lock();
        state.vqs.iter().find(|(l, _)| *l == link).map_or(0, |(_, q)| q.len())
    }
}

// ── ConfluxDirectory ──────────────────────────────────────────────────────────

/// Link → owning-conflux inbox, for intersection handoffs and loader routing.
/// Built once at wiring time and shared immutably.
#[derive(Default)]
pub struct ConfluxDirectory {
    by_link: FxHashMap<LinkId, Arc<ConfluxInbox>>,
}

impl ConfluxDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, link: LinkId, inbox: Arc<ConfluxInbox>) {
        self.by_link.insert(link, inbox);
    }

    pub fn lookup(&self, link: LinkId) -> Option<&Arc<ConfluxInbox>> {
        self.by_link.get(&link)
    }
}

// ── Internal structures ───────────────────────────────────────────────────────

struct UpLink {
    link: LinkId,
    /// Owned segment ids, downstream-first (index 0 touches the
    /// intersection).
    seg_ids: Vec<SegmentId>,
    /// `prefix_cm[k]` = total length of segments strictly downstream of
    /// `seg_ids[k]`.
    prefix_cm: Vec<i64>,
    /// Index into `seg_ids` of the segment currently being processed.
    cursor: usize,
    candidate: Option<Candidate>,
}

#[derive(Copy, Clone, Debug)]
struct Candidate {
    segment: SegmentId,
    lane: u16,
    person: EntityId,
    dist_to_intersection_cm: i64,
}

#[derive(Default)]
struct TravelAccum {
    sum_s: f64,
    samples: u32,
}

/// Rows and registry deltas accumulated over one conflux tick.
#[derive(Default)]
struct TickScratch {
    traces: Vec<TraceRow>,
    to_add: Vec<CellRegistration>,
    to_remove: Vec<CellId>,
}

// ── Conflux ───────────────────────────────────────────────────────────────────

/// The aggregate scheduler for one intersection.
///
/// Owns every [`SegmentStats`] on its upstream links; orders contained
/// persons by urgency each tick; hands persons across intersection
/// boundaries through neighbours' bounded virtual queues.
pub struct Conflux {
    entity_id: EntityId,
    conflux_id: ConfluxId,
    node: NodeId,
    worker: Option<WorkerId>,
    base_gran_ms: u32,
    network: Arc<RoadNetwork>,
    hub: Arc<OutputHub>,

    uplinks: Vec<UpLink>,
    supply: SupplyMap,
    inbox: Arc<ConfluxInbox>,
    directory: Arc<ConfluxDirectory>,

    /// Persons whose new trip leg starts on a link whose conflux refused
    /// them this tick; retried at the next tick's intake step.
    retry_handoff: Vec<Box<Person>>,

    activity_performers: Vec<Box<Person>>,
    pedestrians: Vec<Box<Person>>,
    mrt: Vec<Box<Person>>,
    bus_stops: Vec<BusStopAgent>,

    link_times: FxHashMap<LinkId, TravelAccum>,
    seg_times: FxHashMap<SegmentId, TravelAccum>,
}

impl Conflux {
    pub fn new(
        conflux_id: ConfluxId,
        entity_id: EntityId,
        node: NodeId,
        network: Arc<RoadNetwork>,
        hub: Arc<OutputHub>,
        base_gran_ms: u32,
    ) -> Self {
        let mut incoming: Vec<LinkId> = network.incoming_links(node).to_vec();
        incoming.sort_unstable();

        let mut all_stats = Vec::new();
        let mut bus_stops = Vec::new();
        let uplinks = incoming
            .iter()
            .map(|&link_id| {
                let link = network.link(link_id);
                // Downstream-first: reverse the link's upstream→downstream chain.
                let seg_ids: Vec<SegmentId> = link.segments.iter().rev().copied().collect();
                let mut prefix_cm = Vec::with_capacity(seg_ids.len());
                let mut acc = 0i64;
                for &seg in &seg_ids {
                    prefix_cm.push(acc);
                    acc += network.segment(seg).length_cm;
                }
                for &seg in &seg_ids {
                    let stats = SegmentStats::new(network.segment(seg), base_gran_ms);
                    for &stop in &stats.bus_stops {
                        bus_stops.push(BusStopAgent::new(stop, seg));
                    }
                    all_stats.push(stats);
                }
                UpLink { link: link_id, seg_ids, prefix_cm, cursor: 0, candidate: None }
            })
            .collect();

        let inbox = Arc::new(ConfluxInbox::new(conflux_id, incoming));
        Self {
            entity_id,
            conflux_id,
            node,
            worker: None,
            base_gran_ms,
            network,
            hub,
            uplinks,
            supply: SupplyMap::new(all_stats),
            inbox,
            directory: Arc::new(ConfluxDirectory::new()),
            retry_handoff: Vec::new(),
            activity_performers: Vec::new(),
            pedestrians: Vec::new(),
            mrt: Vec::new(),
            bus_stops,
            link_times: FxHashMap::default(),
            seg_times: FxHashMap::default(),
        }
    }

    pub fn conflux_id(&self) -> ConfluxId {
        self.conflux_id
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn inbox(&self) -> Arc<ConfluxInbox> {
        Arc::clone(&self.inbox)
    }

    /// Install the link directory once all confluxes are wired.
    pub fn set_directory(&mut self, directory: Arc<ConfluxDirectory>) {
        self.directory = directory;
    }

    pub fn supply(&self) -> &SupplyMap {
        &self.supply
    }

    /// Vehicles this intersection can discharge in one tick — the `C` of the
    /// top-C merge: one per lane of each upstream link's exit segment.
    pub fn discharge_capacity(&self) -> usize {
        let per_exit: usize = self
            .uplinks
            .iter()
            .filter_map(|ul| {
                let exit = *ul.seg_ids.first()?;
                self.supply.with(exit, SegmentStats::lane_count)
            })
            .sum();
        per_exit.max(1)
    }

    /// All contained on-road persons, ordered by urgency: the first
    /// `discharge_capacity()` ids are in exact ascending distance to the
    /// intersection; the rest follow per-link.
    pub fn persons_by_urgency(&self) -> Vec<EntityId> {
        let lists: Vec<VecDeque<(EntityId, i64)>> = self
            .uplinks
            .iter()
            .map(|ul| {
                let mut list = VecDeque::new();
                for (k, &seg) in ul.seg_ids.iter().enumerate() {
                    self.supply.with(seg, |stats| {
                        for (id, dist) in stats.ordered_ids() {
                            list.push_back((id, dist + ul.prefix_cm[k]));
                        }
                    });
                }
                list
            })
            .collect();
        top_c_merge(lists, self.discharge_capacity(), |(id, dist)| (*dist, *id))
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    /// Total persons owned by this conflux, including queued and riding ones.
    pub fn count_persons(&self) -> usize {
        let mut n = 0;
        self.for_each_person(|_| n += 1);
        n + self.inbox.held_count() + self.retry_handoff.len()
    }

    /// Visit every person owned by this conflux (excluding the inbox).
    pub fn for_each_person(&self, mut f: impl FnMut(&Person)) {
        let mut visit = |p: &Person| {
            if let Role::BusDriver { movement, .. } = &p.role {
                for pax in &movement.passengers {
                    f(pax);
                }
            }
            f(p);
        };
        self.supply.for_each_mut(|stats| stats.for_each_person(&mut visit));
        for p in self
            .activity_performers
            .iter()
            .chain(&self.pedestrians)
            .chain(&self.mrt)
            .chain(&self.retry_handoff)
        {
            visit(p);
        }
        for agent in &self.bus_stops {
            agent.for_each_person(&mut visit);
        }
    }

    // ── Tick steps ────────────────────────────────────────────────────────

    /// Step 0: admit staged persons and retry refused handoffs.
    fn intake(&mut self, now: Timeslice, scratch: &mut TickScratch, ctx: &mut TickContext<'_>) {
        for person in self.inbox.drain_intake() {
            self.admit_new_person(person, now, scratch, ctx);
        }
        for person in std::mem::take(&mut self.retry_handoff) {
            let link = self.network.segment(person.core.segment).link;
            match self.directory.lookup(link).cloned() {
                Some(inbox) => {
                    let cells = Self::cells_of(&person);
                    match inbox.try_hand_over(link, person) {
                        Ok(()) => scratch.to_remove.extend(cells),
                        Err(p) => self.retry_handoff.push(p),
                    }
                }
                None => self.kill(person, "no conflux owns the target link", scratch),
            }
        }
    }

    fn admit_new_person(
        &mut self,
        mut person: Box<Person>,
        now: Timeslice,
        scratch: &mut TickScratch,
        ctx: &mut TickContext<'_>,
    ) {
        match person.starting_segment() {
            Some(seg) if self.supply.owns(seg) => {
                person.core.segment = seg;
                person.core.lane = LaneId::INFINITY;
                person.core.distance_to_seg_end_cm =
                    self.supply.with(seg, |s| s.length_cm).unwrap_or(0);
                person.core.link_entry_ms = now.ms;
                person.core.seg_entry_ms = now.ms;
                {
                    let mut mctx = MoveContext::new(
                        now,
                        self.base_gran_ms,
                        &self.network,
                        &self.supply,
                    );
                    person.init_movement(&mut mctx);
                }
                scratch.to_add.extend(person.core.subscriptions());
                self.supply.with_mut(seg, |s| s.accepted_flow += 1);
                self.supply.insert_person(person);
            }
            Some(seg) => {
                // Misrouted by the loader: forward to the owning conflux.
                let link = self.network.segment(seg).link;
                match self.directory.lookup(link).cloned() {
                    Some(inbox) => {
                        person.core.segment = seg;
                        person.core.distance_to_seg_end_cm =
                            self.network.segment(seg).length_cm;
                        if let Err(p) = inbox.try_hand_over(link, person) {
                            self.retry_handoff.push(p);
                        }
                    }
                    None => {
                        ctx.raise_fatal(KernelFault::UnownedSegment { segment: seg });
                        self.kill(person, "starting segment owned by no conflux", scratch);
                    }
                }
            }
            None => {
                {
                    let mut mctx = MoveContext::new(
                        now,
                        self.base_gran_ms,
                        &self.network,
                        &self.supply,
                    );
                    person.init_movement(&mut mctx);
                }
                scratch.to_add.extend(person.core.subscriptions());
                let kind = person.role_kind();
                self.place_offroad(person, kind, scratch);
            }
        }
    }

    /// Steps 1–2: per-tick resets and virtual-queue bounds.
    fn reset_and_bound(&mut self) {
        self.supply.for_each_mut(SegmentStats::reset_tick);
        for ul in &mut self.uplinks {
            ul.cursor = 0;
            ul.candidate = None;
        }
        for ul in &self.uplinks {
            let entry = *ul.seg_ids.last().expect("links are non-empty");
            let bound = self
                .supply
                .with(entry, |s| s.capacity_pcu() as i64 - s.count() as i64)
                .unwrap_or(0);
            self.inbox.set_bound(ul.link, bound);
        }
    }

    /// Step 3/4g: recompute one uplink's candidate, walking the cursor
    /// upstream past exhausted segments.
    fn refresh_candidate(&mut self, idx: usize, frame: u64) {
        let supply = &self.supply;
        let ul = &mut self.uplinks[idx];
        ul.candidate = None;
        while ul.cursor < ul.seg_ids.len() {
            let seg = ul.seg_ids[ul.cursor];
            let found = supply.with(seg, |stats| stats.front_unticked(frame)).flatten();
            if let Some((lane, person, dist)) = found {
                ul.candidate = Some(Candidate {
                    segment: seg,
                    lane,
                    person,
                    dist_to_intersection_cm: dist + ul.prefix_cm[ul.cursor],
                });
                return;
            }
            ul.cursor += 1;
        }
    }

    /// Step 4a: the candidate closest to the intersection (ties: lower id).
    fn best_candidate(&self) -> Option<(usize, Candidate)> {
        self.uplinks
            .iter()
            .enumerate()
            .filter_map(|(i, ul)| ul.candidate.map(|c| (i, c)))
            .min_by_key(|(_, c)| (c.dist_to_intersection_cm, c.person))
    }

    /// Steps 4b–f: move one person and housekeep the result.
    fn drive_one(
        &mut self,
        cand: Candidate,
        now: Timeslice,
        scratch: &mut TickScratch,
        ctx: &mut TickContext<'_>,
    ) {
        let Some(mut person) = self.supply.take_person(cand.segment, cand.lane, cand.person)
        else {
            return;
        };
        if person.core.last_ticked_frame != Some(now.frame) {
            person.core.remaining_ms = self.base_gran_ms as u64;
            person.core.last_ticked_frame = Some(now.frame);
        }
        let before = person.props();
        let before_link_entry = person.core.link_entry_ms;

        let moved = {
            let mut mctx =
                MoveContext::new(now, self.base_gran_ms, &self.network, &self.supply);
            catch_unwind(AssertUnwindSafe(|| {
                let outcome = person.tick_movement(&mut mctx);
                (outcome, std::mem::take(&mut mctx.crossings))
            }))
        };
        let (outcome, crossings) = match moved {
            Ok(ok) => ok,
            Err(_) => {
                self.kill(person, "role tick panicked", scratch);
                return;
            }
        };

        self.push_trace(&person, now, scratch);
        self.settle(person, before, before_link_entry, outcome, crossings, now, scratch, ctx);
    }

    /// Step 4e/f: housekeeping after one person's move.
    #[allow(clippy::too_many_arguments)]
    fn settle(
        &mut self,
        person: Box<Person>,
        before: PersonProps,
        before_link_entry: u64,
        outcome: MoveOutcome,
        mut crossings: Vec<SegmentCrossing>,
        now: Timeslice,
        scratch: &mut TickScratch,
        ctx: &mut TickContext<'_>,
    ) {
        match outcome {
            MoveOutcome::Stay => {
                self.account_segment_times(&crossings);
                self.supply.insert_person(person);
            }
            MoveOutcome::Completed => {
                self.account_segment_times(&crossings);
                if let Some(last) = crossings.last() {
                    self.account_link_time(last, before_link_entry);
                }
                self.finish_trip_item(person, now, scratch, ctx);
            }
            MoveOutcome::EnteredNextLink => {
                let target_link = self.network.segment(person.core.segment).link;
                let Some(inbox) = self.directory.lookup(target_link).cloned() else {
                    ctx.raise_fatal(KernelFault::UnownedSegment { segment: person.core.segment });
                    self.kill(person, "crossed into a link owned by no conflux", scratch);
                    return;
                };
                let cells = Self::cells_of(&person);
                match inbox.try_hand_over(target_link, person) {
                    Ok(()) => {
                        self.account_segment_times(&crossings);
                        if let Some(last) = crossings.last() {
                            self.account_link_time(last, before_link_entry);
                        }
                        // Handed over: this worker stops flipping the cells;
                        // the destination re-registers them on admission.
                        scratch.to_remove.extend(cells);
                    }
                    Err(mut refused) => {
                        // Bound exhausted: roll back to the exit segment and
                        // retry next tick.  The exit crossing is dropped from
                        // the books — it did not happen.
                        let exit_crossing = crossings.pop();
                        self.account_segment_times(&crossings);
                        refused.core.segment = before.segment;
                        refused.core.lane = before.lane;
                        refused.core.distance_to_seg_end_cm = 0;
                        refused.core.is_queuing = true;
                        refused.core.remaining_ms = 0;
                        refused.core.link_entry_ms = before_link_entry;
                        if let Some(cross) = exit_crossing {
                            refused.core.seg_entry_ms = cross.entered_ms;
                        }
                        self.supply.insert_person(refused);
                    }
                }
            }
        }
    }

    /// Trip-chain switching after a role reported completion.
    fn finish_trip_item(
        &mut self,
        mut person: Box<Person>,
        now: Timeslice,
        scratch: &mut TickScratch,
        ctx: &mut TickContext<'_>,
    ) {
        // A bus finishing its route releases its riders first.
        if let Role::BusDriver { movement, .. } = &mut person.role {
            let riders = std::mem::take(&mut movement.passengers);
            for rider in riders {
                self.finish_trip_item(rider, now, scratch, ctx);
            }
        }

        let switch = {
            let mut mctx =
                MoveContext::new(now, self.base_gran_ms, &self.network, &self.supply);
            person.switch_to_next_item(&mut mctx)
        };
        match switch {
            TripSwitch::Finished => {
                debug!(person = %person.core.id, "trip chain complete");
                self.kill(person, "trip chain complete", scratch);
            }
            TripSwitch::Failed(e) => {
                warn!(person = %person.core.id, error = %e, "trip switch failed");
                self.kill(person, "trip switch failed", scratch);
            }
            TripSwitch::Switched(kind) => {
                self.place_after_switch(person, kind, now, scratch, ctx);
            }
        }
    }

    /// Place a person whose new role was just initialised.
    fn place_after_switch(
        &mut self,
        mut person: Box<Person>,
        kind: RoleKind,
        now: Timeslice,
        scratch: &mut TickScratch,
        ctx: &mut TickContext<'_>,
    ) {
        if !kind.occupies_lane() {
            self.place_offroad(person, kind, scratch);
            return;
        }
        // Road roles: the new path's entry segment decides the owner.
        let seg = person.core.segment;
        if self.supply.owns(seg) {
            person.core.lane = LaneId::INFINITY;
            person.core.link_entry_ms = now.ms;
            person.core.seg_entry_ms = now.ms;
            self.supply.with_mut(seg, |s| s.accepted_flow += 1);
            self.supply.insert_person(person);
            return;
        }
        if seg == SegmentId::INVALID || seg.index() >= self.network.segment_count() {
            self.kill(person, "next trip leg references an unknown segment", scratch);
            return;
        }
        let link = self.network.segment(seg).link;
        match self.directory.lookup(link).cloned() {
            Some(inbox) => {
                let cells = Self::cells_of(&person);
                match inbox.try_hand_over(link, person) {
                    Ok(()) => scratch.to_remove.extend(cells),
                    // Refused: keep it here, cells stay registered until the
                    // handoff eventually succeeds.
                    Err(p) => self.retry_handoff.push(p),
                }
            }
            None => {
                ctx.raise_fatal(KernelFault::UnownedSegment { segment: seg });
                self.kill(person, "next trip leg starts on an unowned link", scratch);
            }
        }
    }

    /// Route an off-road person into the right holding list.
    fn place_offroad(&mut self, person: Box<Person>, kind: RoleKind, scratch: &mut TickScratch) {
        match kind {
            RoleKind::Activity => self.activity_performers.push(person),
            RoleKind::Pedestrian => self.pedestrians.push(person),
            RoleKind::Passenger => self.mrt.push(person),
            RoleKind::WaitBusActivity => {
                let stop = match &person.role {
                    Role::WaitBusActivity { movement, .. } => movement.stop,
                    _ => unreachable!("kind matches role"),
                };
                match self.bus_stops.iter_mut().find(|a| a.stop == stop) {
                    Some(agent) => agent.add_waiting(person),
                    None => {
                        self.kill(person, "waiting for a stop outside this conflux", scratch)
                    }
                }
            }
            RoleKind::Driver | RoleKind::BusDriver => {
                unreachable!("road roles are placed by place_after_switch")
            }
        }
    }

    /// Step 5: admit backlog from the virtual queues into lane infinity.
    fn process_virtual_queues(&mut self, now: Timeslice, scratch: &mut TickScratch) {
        for i in 0..self.uplinks.len() {
            let link = self.uplinks[i].link;
            let entry = *self.uplinks[i].seg_ids.last().expect("links are non-empty");
            let entry_len = self.supply.with(entry, |s| s.length_cm).unwrap_or(0);
            while let Some(mut person) = self.inbox.admit_one(link) {
                person.core.segment = entry;
                person.core.lane = LaneId::INFINITY;
                person.core.distance_to_seg_end_cm = entry_len;
                person.core.is_queuing = false;
                person.core.remaining_ms = self.base_gran_ms as u64;
                person.core.seg_entry_ms = now.ms;
                person.core.link_entry_ms = now.ms;
                scratch.to_add.extend(Self::subscriptions_of(&person));
                self.supply.with_mut(entry, |s| s.accepted_flow += 1);
                self.supply.insert_person(person);
            }
        }
    }

    /// Step 6: boarding and alighting at stops served by dwelling buses.
    fn update_bus_stops(&mut self, now: Timeslice, scratch: &mut TickScratch, ctx: &mut TickContext<'_>) {
        let mut dwelling: Vec<(SegmentId, u16, EntityId, mts_core::BusStopId)> = Vec::new();
        self.supply.for_each_mut(|stats| {
            stats.for_each_person(|p| {
                if let Role::BusDriver { movement, .. } = &p.role
                    && let Some(stop) = movement.at_stop
                {
                    dwelling.push((p.core.segment, p.core.lane, p.core.id, stop));
                }
            });
        });

        for (seg, lane, id, stop) in dwelling {
            let Some(mut bus) = self.supply.take_person(seg, lane, id) else { continue };
            self.serve_stop(&mut bus, stop, now, scratch, ctx);
            self.supply.insert_person(bus);
        }
    }

    fn serve_stop(
        &mut self,
        bus: &mut Person,
        stop: mts_core::BusStopId,
        now: Timeslice,
        scratch: &mut TickScratch,
        ctx: &mut TickContext<'_>,
    ) {
        // Alight riders bound for this stop.
        let (alighted, spare) = {
            let Role::BusDriver { movement, .. } = &mut bus.role else { return };
            let mut alighted = Vec::new();
            let mut i = 0;
            while i < movement.passengers.len() {
                let wants_off = match &movement.passengers[i].role {
                    Role::Passenger { movement: pm, .. } => pm.alight_stop() == Some(stop),
                    _ => false,
                };
                if wants_off {
                    alighted.push(movement.passengers.remove(i));
                } else {
                    i += 1;
                }
            }
            let spare = movement.capacity.saturating_sub(movement.passengers.len());
            (alighted, spare)
        };
        for rider in alighted {
            self.finish_trip_item(rider, now, scratch, ctx);
        }

        // Board waiters in arrival order while capacity lasts.
        let boarders = match self.bus_stops.iter_mut().find(|a| a.stop == stop) {
            Some(agent) => agent.take_boarders(spare),
            None => Vec::new(),
        };
        let Role::BusDriver { movement, .. } = &mut bus.role else { return };
        for mut boarder in boarders {
            let alight = match &boarder.role {
                Role::WaitBusActivity { movement: wm, .. } => wm.alight_stop,
                _ => None,
            };
            boarder.replace_role(Role::Passenger {
                behavior: mts_person::transit::PassengerBehavior,
                movement: mts_person::transit::PassengerMovement::bus(alight),
            });
            boarder.core.last_ticked_frame = Some(now.frame);
            movement.passengers.push(boarder);
        }
    }

    /// Step 7: tick activity performers, pedestrians, rail riders, and
    /// waiting persons.
    fn tick_offroad(&mut self, now: Timeslice, scratch: &mut TickScratch, ctx: &mut TickContext<'_>) {
        for field in [
            std::mem::take(&mut self.activity_performers),
            std::mem::take(&mut self.pedestrians),
            std::mem::take(&mut self.mrt),
        ] {
            for mut person in field {
                if person.core.last_ticked_frame == Some(now.frame) {
                    let kind = person.role_kind();
                    self.place_offroad(person, kind, scratch);
                    continue;
                }
                person.core.remaining_ms = self.base_gran_ms as u64;
                person.core.last_ticked_frame = Some(now.frame);

                let moved = {
                    let mut mctx =
                        MoveContext::new(now, self.base_gran_ms, &self.network, &self.supply);
                    catch_unwind(AssertUnwindSafe(|| person.tick_movement(&mut mctx)))
                };
                let outcome = match moved {
                    Ok(o) => o,
                    Err(_) => {
                        self.kill(person, "role tick panicked", scratch);
                        continue;
                    }
                };
                self.push_trace(&person, now, scratch);
                match outcome {
                    MoveOutcome::Completed => self.finish_trip_item(person, now, scratch, ctx),
                    _ => {
                        let kind = person.role_kind();
                        self.place_offroad(person, kind, scratch);
                    }
                }
            }
        }

        // Waiting persons accumulate waiting time in place.
        let mut wait_traces = Vec::new();
        for agent in &mut self.bus_stops {
            for person in agent.waiting_mut() {
                if person.core.last_ticked_frame == Some(now.frame) {
                    continue;
                }
                person.core.remaining_ms = self.base_gran_ms as u64;
                person.core.last_ticked_frame = Some(now.frame);
                let mut mctx =
                    MoveContext::new(now, self.base_gran_ms, &self.network, &self.supply);
                let _ = person.tick_movement(&mut mctx);
                let pos = person.core.live_position(&self.network);
                wait_traces.push(TraceRow {
                    role_tag: person.role_kind().tag(),
                    entity_id: person.core.id.0,
                    frame: now.frame,
                    x_cm: pos.x_cm,
                    y_cm: pos.y_cm,
                    extra: person.describe(),
                });
            }
        }
        scratch.traces.append(&mut wait_traces);
    }

    /// Step 8: flush travel times, traces, and the position snapshot.
    fn report(&mut self, now: Timeslice, scratch: &mut TickScratch) {
        let end_ms = now.ms + self.base_gran_ms as u64;
        let seg_rows: Vec<SegmentTravelTimeRow> = self
            .seg_times
            .drain()
            .filter(|(_, acc)| acc.samples > 0)
            .map(|(seg, acc)| SegmentTravelTimeRow {
                segment_id: seg.0,
                start_ms: now.ms,
                end_ms,
                mean_travel_s: acc.sum_s / acc.samples as f64,
                samples: acc.samples,
            })
            .collect();
        let link_rows: Vec<LinkTravelTimeRow> = self
            .link_times
            .drain()
            .filter(|(_, acc)| acc.samples > 0)
            .map(|(link, acc)| LinkTravelTimeRow {
                link_id: link.0,
                start_ms: now.ms,
                end_ms,
                mean_travel_s: acc.sum_s / acc.samples as f64,
                samples: acc.samples,
            })
            .collect();

        let mut positions: Vec<(EntityId, Point)> = Vec::new();
        self.for_each_person(|p| {
            if !p.core.is_fake {
                positions.push((p.core.id, p.core.committed_position()));
            }
        });

        self.hub.push_segment_times(seg_rows);
        self.hub.push_link_times(link_rows);
        self.hub.push_traces(std::mem::take(&mut scratch.traces));
        self.hub.push_positions(positions);
    }

    // ── Small helpers ─────────────────────────────────────────────────────

    fn push_trace(&self, person: &Person, now: Timeslice, scratch: &mut TickScratch) {
        if person.core.is_fake {
            return;
        }
        let pos = person.core.live_position(&self.network);
        scratch.traces.push(TraceRow {
            role_tag: person.role_kind().tag(),
            entity_id: person.core.id.0,
            frame: now.frame,
            x_cm: pos.x_cm,
            y_cm: pos.y_cm,
            extra: person.describe(),
        });
    }

    /// Cell ids of a person including, for buses, every rider on board —
    /// the full set that changes registries when the vehicle changes worker.
    fn cells_of(person: &Person) -> Vec<CellId> {
        let mut ids = person.core.cell_ids();
        if let Role::BusDriver { movement, .. } = &person.role {
            for rider in &movement.passengers {
                ids.extend(rider.core.cell_ids());
            }
        }
        ids
    }

    /// Registrations of a person including any riders on board.
    fn subscriptions_of(person: &Person) -> Vec<CellRegistration> {
        let mut regs = person.core.subscriptions();
        if let Role::BusDriver { movement, .. } = &person.role {
            for rider in &movement.passengers {
                regs.extend(rider.core.subscriptions());
            }
        }
        regs
    }

    fn account_segment_times(&mut self, crossings: &[SegmentCrossing]) {
        for c in crossings {
            let acc = self.seg_times.entry(c.segment).or_default();
            acc.sum_s += (c.exited_ms.saturating_sub(c.entered_ms)) as f64 / 1000.0;
            acc.samples += 1;
        }
    }

    fn account_link_time(&mut self, exit_crossing: &SegmentCrossing, link_entry_ms: u64) {
        let link = self.network.segment(exit_crossing.segment).link;
        let acc = self.link_times.entry(link).or_default();
        acc.sum_s += (exit_crossing.exited_ms.saturating_sub(link_entry_ms)) as f64 / 1000.0;
        acc.samples += 1;
    }

    /// Retire a person: deregister its cells and drop it (the census counts
    /// the drop).
    fn kill(&mut self, person: Box<Person>, cause: &str, scratch: &mut TickScratch) {
        debug!(person = %person.core.id, cause, "retiring person");
        scratch.to_remove.extend(Self::cells_of(&person));
        drop(person);
    }
}

// ── Entity impl ───────────────────────────────────────────────────────────────

impl Entity for Conflux {
    fn id(&self) -> EntityId {
        self.entity_id
    }

    fn current_worker(&self) -> Option<WorkerId> {
        self.worker
    }

    fn set_current_worker(&mut self, worker: Option<WorkerId>) {
        self.worker = worker;
    }

    fn handle_message(
        &mut self,
        _from: Option<EntityId>,
        msg: &Message,
        _ctx: &mut TickContext<'_>,
    ) {
        match msg {
            Message::InsertIncident { segment, flow_per_tick } => {
                if self.supply.with_mut(*segment, |s| s.set_incident(*flow_per_tick)).is_some() {
                    debug!(conflux = %self.conflux_id, segment = %segment, flow = *flow_per_tick,
                           "incident inserted");
                }
            }
            Message::RemoveIncident { segment } => {
                if self.supply.with_mut(*segment, SegmentStats::clear_incident).is_some() {
                    debug!(conflux = %self.conflux_id, segment = %segment, "incident removed");
                }
            }
            _ => {}
        }
    }

    fn frame_tick(&mut self, ctx: &mut TickContext<'_>) -> UpdateStatus {
        let now = ctx.now;
        let mut scratch = TickScratch::default();

        // 0: staged arrivals and retried handoffs.
        self.intake(now, &mut scratch, ctx);
        // 1–2: supply reset, cursors to downstream ends, vq bounds.
        self.reset_and_bound();
        // 3: initial candidates.
        for i in 0..self.uplinks.len() {
            self.refresh_candidate(i, now.frame);
        }
        // 4: main loop — most urgent person first.
        while let Some((idx, cand)) = self.best_candidate() {
            self.drive_one(cand, now, &mut scratch, ctx);
            self.refresh_candidate(idx, now.frame);
        }
        // 5: backlog admission from virtual queues.
        self.process_virtual_queues(now, &mut scratch);
        // 6: bus stops.
        self.update_bus_stops(now, &mut scratch, ctx);
        // 7: off-road persons.
        self.tick_offroad(now, &mut scratch, ctx);
        // 8: reporting.
        self.report(now, &mut scratch);

        let mut status = UpdateStatus::proceed();
        status.to_add = scratch.to_add;
        status.to_remove = scratch.to_remove;
        status
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}
