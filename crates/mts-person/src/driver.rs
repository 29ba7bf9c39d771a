//! Car driver facets and the shared vehicle advance loop.
//!
//! The shipped movement is interface-level kinematics: free-flow advance at
//! the behavior's target speed, bounded by segment storage (`can_accept`) and
//! lane discharge (`try_discharge`).  Car-following, gap acceptance, and lane
//! change utility belong to collaborator models behind the same facets.

use mts_core::{BusStopId, LaneId, SegmentId, centimetres_covered, seconds_to_cover};

use crate::person::PersonCore;
use crate::role::{BehaviorFacet, MoveContext, MoveOutcome, MovementFacet, RoleKind};

// ── Behavior ──────────────────────────────────────────────────────────────────

/// Free-flow speed preference, drawn once per driver.
pub struct DriverBehavior {
    speed_factor: f64,
}

impl DriverBehavior {
    /// Draw a persistent speed factor from the person's own stream.
    pub fn draw(rng: &mut mts_core::EntityRng) -> Self {
        Self { speed_factor: rng.gen_range(0.9..1.1) }
    }

    /// Exactly the segment's free-flow speed; useful in arrival-time tests.
    pub fn free_flow() -> Self {
        Self { speed_factor: 1.0 }
    }

    /// Target speed on a segment with the given limit.
    pub fn target_speed(&self, seg_max_mps: f64) -> f64 {
        (seg_max_mps * self.speed_factor).max(0.5)
    }
}

impl BehaviorFacet for DriverBehavior {
    fn kind(&self) -> RoleKind {
        RoleKind::Driver
    }
}

// ── Shared advance loop ───────────────────────────────────────────────────────

/// What one advance attempt did.  `PausedAtStop` only occurs for vehicles
/// whose `pause_at` hook reports a stop ahead (buses).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(crate) enum DriveStep {
    Stay,
    EnteredNextLink,
    Completed,
    PausedAtStop(BusStopId),
}

/// Re-align `cursor` with the person's actual placement.
///
/// A refused intersection handoff rolls the placement back to the previous
/// link's exit segment; the cursor follows the placement, not the other way
/// round.
pub(crate) fn resync_cursor(path: &[SegmentId], cursor: &mut usize, segment: SegmentId) {
    if path.get(*cursor) != Some(&segment)
        && let Some(pos) = path.iter().position(|s| *s == segment)
    {
        *cursor = pos;
    }
}

/// Advance a vehicle along `path` for the person's remaining tick time.
///
/// Within one link the loop may cross several segments (each crossing gated
/// by `can_accept` of the next segment and `try_discharge` of the current
/// lane); crossing an intersection ends the loop with `EnteredNextLink` so
/// the conflux can hand the person over (or refuse and roll back).
///
/// `pause_at(segment, dist_to_end)` reports the next service stop strictly
/// ahead of the current position on that segment, as
/// `(stop, stop_dist_from_segment_end)`.
pub(crate) fn drive_along(
    path: &[SegmentId],
    cursor: &mut usize,
    speed_mps: f64,
    core: &mut PersonCore,
    ctx: &mut MoveContext<'_>,
    mut pause_at: impl FnMut(SegmentId, i64) -> Option<(BusStopId, i64)>,
) -> DriveStep {
    let budget_ms = core.remaining_ms;
    let mut rem_ms = budget_ms;

    let step = loop {
        if rem_ms == 0 {
            break DriveStep::Stay;
        }
        let seg = ctx.network.segment(core.segment);
        if core.lane == LaneId::INFINITY {
            core.lane = ctx.admission.pick_lane(core.segment);
        }

        // Service stop ahead on this segment?
        if let Some((stop, stop_dist)) = pause_at(core.segment, core.distance_to_seg_end_cm) {
            let gap_cm = core.distance_to_seg_end_cm - stop_dist;
            let possible_cm = centimetres_covered(speed_mps, rem_ms);
            if possible_cm < gap_cm {
                core.distance_to_seg_end_cm -= possible_cm;
                core.is_queuing = false;
                rem_ms = 0;
                break DriveStep::Stay;
            }
            let used_ms = (seconds_to_cover(gap_cm, speed_mps) * 1000.0).ceil() as u64;
            rem_ms = rem_ms.saturating_sub(used_ms);
            core.distance_to_seg_end_cm = stop_dist;
            core.is_queuing = false;
            break DriveStep::PausedAtStop(stop);
        }

        let possible_cm = centimetres_covered(speed_mps, rem_ms);
        if possible_cm < core.distance_to_seg_end_cm {
            core.distance_to_seg_end_cm -= possible_cm;
            core.is_queuing = false;
            rem_ms = 0;
            break DriveStep::Stay;
        }

        // Reaching the segment end this tick.
        let next = path.get(*cursor + 1).copied();
        let same_link = next.is_some_and(|n| ctx.network.segment(n).link == seg.link);

        // A full same-link downstream segment blocks before any discharge is
        // consumed.
        if let Some(n) = next
            && same_link
            && !ctx.admission.can_accept(n)
        {
            core.distance_to_seg_end_cm = 0;
            core.is_queuing = true;
            rem_ms = 0;
            break DriveStep::Stay;
        }

        if !ctx.admission.try_discharge(LaneId::new(core.segment, core.lane)) {
            core.distance_to_seg_end_cm = 0;
            core.is_queuing = true;
            rem_ms = 0;
            break DriveStep::Stay;
        }

        let used_ms =
            (seconds_to_cover(core.distance_to_seg_end_cm, speed_mps) * 1000.0).ceil() as u64;
        rem_ms = rem_ms.saturating_sub(used_ms);
        let exited_ms = ctx.now.ms + (budget_ms - rem_ms);
        ctx.crossings.push(crate::role::SegmentCrossing {
            segment: core.segment,
            entered_ms: core.seg_entry_ms,
            exited_ms,
        });

        match next {
            None => break DriveStep::Completed,
            Some(n) => {
                *cursor += 1;
                core.segment = n;
                core.lane = LaneId::INFINITY;
                core.distance_to_seg_end_cm = ctx.network.segment(n).length_cm;
                core.seg_entry_ms = exited_ms;
                core.is_queuing = false;
                if !same_link {
                    core.link_entry_ms = exited_ms;
                    break DriveStep::EnteredNextLink;
                }
            }
        }
    };

    core.remaining_ms = rem_ms;
    step
}

// ── Movement ──────────────────────────────────────────────────────────────────

/// Drives the sub-trip's segment path to its final segment.
pub struct DriverMovement {
    path: Vec<SegmentId>,
    cursor: usize,
}

impl DriverMovement {
    pub fn new(path: Vec<SegmentId>) -> Self {
        Self { path, cursor: 0 }
    }

    pub fn path(&self) -> &[SegmentId] {
        &self.path
    }
}

impl MovementFacet for DriverMovement {
    type Behavior = DriverBehavior;

    fn frame_init(
        &mut self,
        _behavior: &mut DriverBehavior,
        core: &mut PersonCore,
        ctx: &mut MoveContext<'_>,
    ) {
        // The conflux has already placed the person on the path's entry
        // segment (lane infinity); align the cursor with that placement.
        if let Some(pos) = self.path.iter().position(|s| *s == core.segment) {
            self.cursor = pos;
        } else {
            self.cursor = 0;
            core.segment = self.path[0];
            core.distance_to_seg_end_cm = ctx.network.segment(self.path[0]).length_cm;
            core.lane = LaneId::INFINITY;
        }
        core.seg_entry_ms = ctx.now.ms;
        core.link_entry_ms = ctx.now.ms;
        let pos = core.live_position(ctx.network);
        core.publish_position(pos, 0.0);
    }

    fn frame_tick(
        &mut self,
        behavior: &mut DriverBehavior,
        core: &mut PersonCore,
        ctx: &mut MoveContext<'_>,
    ) -> MoveOutcome {
        resync_cursor(&self.path, &mut self.cursor, core.segment);
        let speed = behavior.target_speed(ctx.network.segment(core.segment).max_speed_mps);
        let step = drive_along(&self.path, &mut self.cursor, speed, core, ctx, |_, _| None);
        let pos = core.live_position(ctx.network);
        core.publish_position(pos, if core.is_queuing { 0.0 } else { speed });
        match step {
            DriveStep::Stay => MoveOutcome::Stay,
            DriveStep::EnteredNextLink => MoveOutcome::EnteredNextLink,
            DriveStep::Completed => MoveOutcome::Completed,
            DriveStep::PausedAtStop(_) => unreachable!("cars do not serve stops"),
        }
    }

    fn describe(&self, core: &PersonCore) -> String {
        format!(
            "seg={} lane={} rem={}cm{}",
            core.segment.0,
            core.lane,
            core.distance_to_seg_end_cm,
            if core.is_queuing { " queuing" } else { "" }
        )
    }
}
