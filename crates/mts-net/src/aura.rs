//! The aura manager: "which agents are within rectangle R?"
//!
//! An R-tree over the buffered positions of every live agent.  The tree is
//! rebuilt from a position snapshot between the two external-barrier hits of
//! a tick (the only window in which no worker runs), and is read-only for the
//! rest of the tick — the `RwLock` write lock is therefore never contended
//! with readers under the barrier protocol, it just makes the type safe to
//! share.

use std::sync::RwLock;

use rstar::{AABB, RTree, RTreeObject};

use mts_core::{EntityId, Point};

/// Entry stored in the R-tree: a 2-D centimetre point with its agent id.
#[derive(Clone, Debug)]
struct AuraEntry {
    point: [i64; 2],
    id: EntityId,
}

impl RTreeObject for AuraEntry {
    type Envelope = AABB<[i64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.point)
    }
}

/// Spatial index over agent positions, rebuilt once per tick.
///
/// Query answers are consistent with the snapshot taken at the moment of the
/// last [`rebuild`](AuraManager::rebuild) — agents that moved since are
/// reported at their committed (previous-tick) position, which is exactly the
/// read isolation the rest of the kernel guarantees.
#[derive(Default)]
pub struct AuraManager {
    tree: RwLock<RTree<AuraEntry>>,
}

impl AuraManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the index with a bulk-loaded tree over `snapshot`.
    ///
    /// Must only run between the external barriers.
    pub fn rebuild(&self, snapshot: Vec<(EntityId, Point)>) {
        let entries: Vec<AuraEntry> = snapshot
            .into_iter()
            .map(|(id, p)| AuraEntry { point: [p.x_cm, p.y_cm], id })
            .collect();
        let tree = RTree::bulk_load(entries);
        *self.tree.write().expect("aura lock poisoned") = tree;
    }

    /// All agents inside the axis-aligned rectangle `[min, max]`, inclusive,
    /// except `exclude`.
    pub fn agents_in_rect(
        &self,
        min: Point,
        max: Point,
        exclude: Option<EntityId>,
    ) -> Vec<EntityId> {
        let envelope = AABB::from_corners([min.x_cm, min.y_cm], [max.x_cm, max.y_cm]);
        self.tree
            .read()
            .expect("aura lock poisoned")
            .locate_in_envelope(&envelope)
            .map(|e| e.id)
            .filter(|id| Some(*id) != exclude)
            .collect()
    }

    /// Number of indexed agents (size of the last snapshot).
    pub fn len(&self) -> usize {
        self.tree.read().expect("aura lock poisoned").size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
