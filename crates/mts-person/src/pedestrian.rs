//! Walking facets.
//!
//! Pedestrians move off the carriageway, straight toward their destination
//! point at a per-person speed.  Crossing behaviour, signal compliance, and
//! micro-steering are collaborator models.

use mts_core::{Point, centimetres_covered};

use crate::person::PersonCore;
use crate::role::{BehaviorFacet, MoveContext, MoveOutcome, MovementFacet, RoleKind};

pub struct PedestrianBehavior;

impl BehaviorFacet for PedestrianBehavior {
    fn kind(&self) -> RoleKind {
        RoleKind::Pedestrian
    }
}

/// Straight-line walk from `start` to `dest`.
pub struct PedestrianMovement {
    start: Point,
    dest: Point,
    speed_mps: f64,
}

impl PedestrianMovement {
    pub fn new(start: Point, dest: Point, speed_mps: f64) -> Self {
        Self { start, dest, speed_mps }
    }

    pub fn speed_mps(&self) -> f64 {
        self.speed_mps
    }
}

impl MovementFacet for PedestrianMovement {
    type Behavior = PedestrianBehavior;

    fn frame_init(
        &mut self,
        _behavior: &mut PedestrianBehavior,
        core: &mut PersonCore,
        _ctx: &mut MoveContext<'_>,
    ) {
        core.walk_pos = self.start;
        core.publish_position(self.start, 0.0);
    }

    fn frame_tick(
        &mut self,
        _behavior: &mut PedestrianBehavior,
        core: &mut PersonCore,
        _ctx: &mut MoveContext<'_>,
    ) -> MoveOutcome {
        let step_cm = centimetres_covered(self.speed_mps, core.remaining_ms);
        core.remaining_ms = 0;
        core.walk_pos = core.walk_pos.step_towards(self.dest, step_cm);
        core.publish_position(core.walk_pos, self.speed_mps);
        if core.walk_pos == self.dest {
            MoveOutcome::Completed
        } else {
            MoveOutcome::Stay
        }
    }

    fn describe(&self, core: &PersonCore) -> String {
        format!("walking, {}cm to go", core.walk_pos.manhattan_cm(self.dest))
    }
}
