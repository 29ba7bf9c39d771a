//! The double-buffered shared cell.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use mts_core::{CellId, MutexStrategy};

/// Process-wide cell id source.  Ids only need to be unique, not dense.
static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(0);

fn fresh_cell_id() -> CellId {
    CellId(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed))
}

// ── Cell internals ────────────────────────────────────────────────────────────

/// The two slots of one cell.
///
/// `Buffered` is the normal strategy: plain loads for readers, with safety
/// coming from the tick protocol.  `Locked` trades every access for a lock;
/// it exists to rule buffering out when chasing a memory-ordering suspicion.
enum Slots<T> {
    Buffered {
        current: UnsafeCell<T>,
        next: UnsafeCell<T>,
    },
    Locked(Mutex<(T, T)>),
}

pub(crate) struct Cell<T> {
    id: CellId,
    slots: Slots<T>,
}

// SAFETY: access to the `Buffered` slots follows the tick protocol:
// - `current` is read (plain load) by any thread only *within* a tick;
// - `next` is written only by the single `Shared` writer handle (`&mut self`
//   methods), also only within a tick — a disjoint location from `current`;
// - `flip`/`force` mutate `current` only *between* the barriers, when no
//   reader or writer is running.
// Reads and writes to the same slot therefore never overlap in time, and the
// barriers provide the happens-before edges that publish the flipped values.
unsafe impl<T: Copy + Send> Sync for Cell<T> {}
unsafe impl<T: Copy + Send> Send for Cell<T> {}

impl<T: Copy> Cell<T> {
    fn new(strategy: MutexStrategy, value: T) -> Self {
        let slots = match strategy {
            MutexStrategy::Buffered => Slots::Buffered {
                current: UnsafeCell::new(value),
                next: UnsafeCell::new(value),
            },
            MutexStrategy::Locked => Slots::Locked(Mutex::new((value, value))),
        };
        Self { id: fresh_cell_id(), slots }
    }

    #[inline]
    fn get(&self) -> T {
        match &self.slots {
            // SAFETY: see the Sync impl — `current` is only mutated between
            // barriers, never while a reader can run.
            Slots::Buffered { current, .. } => unsafe { *current.get() },
            Slots::Locked(pair) => pair.lock().expect("shared cell lock poisoned").0,
        }
    }

    #[inline]
    fn set(&self, value: T) {
        match &self.slots {
            // SAFETY: called through the unique writer handle only, so no
            // concurrent writes; readers never touch `next`.
            Slots::Buffered { next, .. } => unsafe { *next.get() = value },
            Slots::Locked(pair) => pair.lock().expect("shared cell lock poisoned").1 = value,
        }
    }

    fn force(&self, value: T) {
        match &self.slots {
            // SAFETY: boundary import runs between ticks, with no concurrent
            // readers or flips.
            Slots::Buffered { current, next } => unsafe {
                *current.get() = value;
                *next.get() = value;
            },
            Slots::Locked(pair) => {
                let mut guard = pair.lock().expect("shared cell lock poisoned");
                *guard = (value, value);
            }
        }
    }

    fn flip(&self) {
        match &self.slots {
            // SAFETY: flips run between the barriers with no concurrent
            // readers or writers.
            Slots::Buffered { current, next } => unsafe {
                *current.get() = *next.get();
            },
            Slots::Locked(pair) => {
                let mut guard = pair.lock().expect("shared cell lock poisoned");
                guard.0 = guard.1;
            }
        }
    }

    fn snapshot(&self) -> (T, T) {
        match &self.slots {
            // SAFETY: snapshots are taken between ticks (serialization).
            Slots::Buffered { current, next } => unsafe { (*current.get(), *next.get()) },
            Slots::Locked(pair) => *pair.lock().expect("shared cell lock poisoned"),
        }
    }
}

// ── FlipCell ──────────────────────────────────────────────────────────────────

/// Type-erased handle a [`BufferRegistry`](crate::BufferRegistry) holds for
/// each owned cell.
pub trait FlipCell: Send + Sync {
    /// Commit next→current.  Must only run between the barriers.
    fn flip(&self);

    fn cell_id(&self) -> CellId;
}

impl<T: Copy + Send> FlipCell for Cell<T> {
    fn flip(&self) {
        Cell::flip(self);
    }

    fn cell_id(&self) -> CellId {
        self.id
    }
}

// ── Shared / SharedReader ─────────────────────────────────────────────────────

/// The writer handle of one buffered value.
///
/// Exactly one `Shared<T>` exists per cell (it is not `Clone`), which is what
/// makes "only the owner writes" a compile-time property rather than a
/// convention.  Cheap reader handles come from [`Shared::reader`].
pub struct Shared<T: Copy + Send> {
    cell: Arc<Cell<T>>,
}

impl<T: Copy + Send + 'static> Shared<T> {
    pub fn new(strategy: MutexStrategy, value: T) -> Self {
        Self { cell: Arc::new(Cell::new(strategy, value)) }
    }

    #[inline]
    pub fn id(&self) -> CellId {
        self.cell.id
    }

    /// The committed value (end of previous tick).
    #[inline]
    pub fn get(&self) -> T {
        self.cell.get()
    }

    /// Stage `value` for the next tick.
    #[inline]
    pub fn set(&mut self, value: T) {
        self.cell.set(value);
    }

    /// Write both slots at once — boundary import of a remote snapshot.
    /// Must only be called between ticks.
    pub fn force(&mut self, value: T) {
        self.cell.force(value);
    }

    /// A cloneable read-only handle for other entities and indexes.
    pub fn reader(&self) -> SharedReader<T> {
        SharedReader { cell: Arc::clone(&self.cell) }
    }

    /// The registration a worker's registry needs to flip this cell.
    pub fn registration(&self) -> crate::CellRegistration {
        crate::CellRegistration::new(self.cell.id, Arc::clone(&self.cell) as Arc<dyn FlipCell>)
    }

    /// The (current, next) pair, for snapshotting collaborators.
    pub fn snapshot(&self) -> (T, T) {
        self.cell.snapshot()
    }
}

impl<T: Copy + Send + std::fmt::Debug + 'static> std::fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared").field("id", &self.cell.id).field("current", &self.get()).finish()
    }
}

/// A read-only handle to a [`Shared<T>`] cell.
pub struct SharedReader<T: Copy + Send> {
    cell: Arc<Cell<T>>,
}

impl<T: Copy + Send> SharedReader<T> {
    #[inline]
    pub fn get(&self) -> T {
        self.cell.get()
    }

    #[inline]
    pub fn id(&self) -> CellId {
        self.cell.id
    }
}

impl<T: Copy + Send> Clone for SharedReader<T> {
    fn clone(&self) -> Self {
        Self { cell: Arc::clone(&self.cell) }
    }
}

// ── Serde ─────────────────────────────────────────────────────────────────────

/// Cells serialize as their `(current, next)` pair and deserialize into a
/// fresh `Buffered` cell holding the identical pair, so a round trip is
/// lossless for the values.  (The strategy is a run-level setting, not part
/// of a cell's value.)
#[cfg(feature = "serde")]
impl<T: Copy + Send + serde::Serialize + 'static> serde::Serialize for Shared<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de, T: Copy + Send + serde::Deserialize<'de> + 'static> serde::Deserialize<'de>
    for Shared<T>
{
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (current, next) = <(T, T)>::deserialize(deserializer)?;
        let cell = Cell {
            id: fresh_cell_id(),
            slots: Slots::Buffered {
                current: UnsafeCell::new(current),
                next: UnsafeCell::new(next),
            },
        };
        Ok(Self { cell: Arc::new(cell) })
    }
}
