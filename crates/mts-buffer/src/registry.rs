//! The per-worker flip registry.

use std::collections::HashMap;
use std::sync::Arc;

use mts_core::CellId;

use crate::FlipCell;

// ── CellRegistration ──────────────────────────────────────────────────────────

/// Everything a registry needs to take ownership of one cell.
#[derive(Clone)]
pub struct CellRegistration {
    id: CellId,
    flip: Arc<dyn FlipCell>,
}

impl CellRegistration {
    pub fn new(id: CellId, flip: Arc<dyn FlipCell>) -> Self {
        Self { id, flip }
    }

    pub fn id(&self) -> CellId {
        self.id
    }
}

impl std::fmt::Debug for CellRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CellRegistration").field(&self.id).finish()
    }
}

// ── BufferRegistry ────────────────────────────────────────────────────────────

/// Tracks the cells one worker owns and flips them in one batch per tick.
///
/// Adds and removes requested during tick N are only applied at the next
/// flip, so a cell's membership — like its value — changes between ticks,
/// never within one.  Each worker owns exactly one registry; no locking is
/// needed because only the owning worker thread touches it.
#[derive(Default)]
pub struct BufferRegistry {
    owned: HashMap<CellId, Arc<dyn FlipCell>>,
    to_add: Vec<CellRegistration>,
    to_remove: Vec<CellId>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `registration` to join this registry at the next flip.
    pub fn queue_add(&mut self, registration: CellRegistration) {
        self.to_add.push(registration);
    }

    /// Queue the cell `id` to leave this registry at the next flip.
    ///
    /// Unknown ids are ignored at apply time: an entity retiring in the same
    /// tick its cells were queued produces exactly that shape.
    pub fn queue_remove(&mut self, id: CellId) {
        self.to_remove.push(id);
    }

    /// Apply pending removes, then pending adds, then flip every owned cell.
    ///
    /// Must only run between the barriers.  Returns the number of cells
    /// flipped.
    pub fn flip_all(&mut self) -> usize {
        for id in self.to_remove.drain(..) {
            self.owned.remove(&id);
        }
        for reg in self.to_add.drain(..) {
            self.owned.insert(reg.id, reg.flip);
        }
        for cell in self.owned.values() {
            cell.flip();
        }
        self.owned.len()
    }

    /// Number of currently owned cells (pending deltas excluded).
    pub fn len(&self) -> usize {
        self.owned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }

    pub fn owns(&self, id: CellId) -> bool {
        self.owned.contains_key(&id)
    }
}
