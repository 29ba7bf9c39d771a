//! Dwell-at-node facets.

use mts_core::NodeId;

use crate::person::PersonCore;
use crate::role::{BehaviorFacet, MoveContext, MoveOutcome, MovementFacet, RoleKind};

pub struct ActivityBehavior;

impl BehaviorFacet for ActivityBehavior {
    fn kind(&self) -> RoleKind {
        RoleKind::Activity
    }
}

/// Stay at `at` until the activity's duration elapses.
pub struct ActivityMovement {
    pub at: NodeId,
    duration_ms: u64,
    end_ms: Option<u64>,
}

impl ActivityMovement {
    pub fn new(at: NodeId, duration_ms: u64) -> Self {
        Self { at, duration_ms, end_ms: None }
    }

    pub fn end_ms(&self) -> Option<u64> {
        self.end_ms
    }
}

impl MovementFacet for ActivityMovement {
    type Behavior = ActivityBehavior;

    fn frame_init(
        &mut self,
        _behavior: &mut ActivityBehavior,
        core: &mut PersonCore,
        ctx: &mut MoveContext<'_>,
    ) {
        self.end_ms = Some(ctx.now.ms + self.duration_ms);
        if self.at.index() < ctx.network.node_count() {
            core.walk_pos = ctx.network.node(self.at).location;
        }
        core.publish_position(core.walk_pos, 0.0);
    }

    fn frame_tick(
        &mut self,
        _behavior: &mut ActivityBehavior,
        core: &mut PersonCore,
        ctx: &mut MoveContext<'_>,
    ) -> MoveOutcome {
        core.remaining_ms = 0;
        match self.end_ms {
            Some(end) if ctx.now.ms >= end => MoveOutcome::Completed,
            _ => MoveOutcome::Stay,
        }
    }

    fn describe(&self, _core: &PersonCore) -> String {
        format!("activity at node {}", self.at.0)
    }
}
