//! Strongly typed, zero-cost identifier wrappers.
//!
//! All IDs are `Copy + Ord + Hash` so they can be used as map keys and sorted
//! collection elements without ceremony.  The inner integer is `pub` to allow
//! direct indexing into arena `Vec`s via `id.0 as usize`, but callers should
//! prefer the `.index()` helpers for clarity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generate a typed ID wrapper around a primitive integer.
macro_rules! typed_id {
    ($(#[$attr:meta])* $vis:vis struct $name:ident($inner:ty);) => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        $vis struct $name(pub $inner);

        impl $name {
            /// Sentinel meaning "no valid ID" — the integer's maximum value.
            pub const INVALID: $name = $name(<$inner>::MAX);

            /// Cast to `usize` for direct use as a `Vec` index.
            #[inline(always)]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl Default for $name {
            /// Returns the `INVALID` sentinel so uninitialized IDs are visibly invalid.
            #[inline(always)]
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<$name> for usize {
            #[inline(always)]
            fn from(id: $name) -> usize {
                id.0 as usize
            }
        }
    };
}

typed_id! {
    /// Identity of one simulated entity (person, conflux, controller).
    /// Unique for the lifetime of a run; never reused.
    pub struct EntityId(u64);
}

typed_id! {
    /// Index of a road-network node (intersection or dead end).
    pub struct NodeId(u32);
}

typed_id! {
    /// Index of a directed link (an ordered chain of road segments).
    pub struct LinkId(u32);
}

typed_id! {
    /// Index of one road segment within the network's segment arena.
    pub struct SegmentId(u32);
}

typed_id! {
    /// Index of a conflux in the simulation's conflux arena.
    pub struct ConfluxId(u32);
}

typed_id! {
    /// Index of a worker thread within its work group.
    pub struct WorkerId(u32);
}

typed_id! {
    /// Identity of one double-buffered shared cell.
    pub struct CellId(u64);
}

typed_id! {
    /// Identity of a bus stop placed on a road segment.
    pub struct BusStopId(u32);
}

// ── LaneId ────────────────────────────────────────────────────────────────────

/// A lane addressed as (segment, index within segment).
///
/// `index == LaneId::INFINITY` addresses the lane-infinity pseudo-lane: the
/// holding area for persons admitted to a segment but not yet to a physical
/// lane.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaneId {
    pub segment: SegmentId,
    pub index: u16,
}

impl LaneId {
    /// Lane index of the lane-infinity pseudo-lane.
    pub const INFINITY: u16 = u16::MAX;

    #[inline]
    pub fn new(segment: SegmentId, index: u16) -> Self {
        Self { segment, index }
    }

    #[inline]
    pub fn infinity(segment: SegmentId) -> Self {
        Self { segment, index: Self::INFINITY }
    }

    #[inline]
    pub fn is_infinity(self) -> bool {
        self.index == Self::INFINITY
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinity() {
            write!(f, "Lane({}:inf)", self.segment.0)
        } else {
            write!(f, "Lane({}:{})", self.segment.0, self.index)
        }
    }
}

// ── EntityIdAllocator ─────────────────────────────────────────────────────────

/// Monotonic entity-id source shared by every producer of entities in a run.
///
/// Ids are handed out by atomic fetch-and-increment.  A caller may force a
/// preferred id; it is honoured only when it is at least the current watermark,
/// and the watermark jumps past it so later automatic ids stay strictly above
/// every id ever returned.
#[derive(Debug, Default)]
pub struct EntityIdAllocator {
    next: AtomicU64,
}

impl EntityIdAllocator {
    pub fn new() -> Self {
        Self { next: AtomicU64::new(0) }
    }

    /// Start automatic assignment at `first` (e.g. after a boundary import).
    pub fn starting_at(first: u64) -> Self {
        Self { next: AtomicU64::new(first) }
    }

    /// Allocate the next automatic id.
    #[inline]
    pub fn allocate(&self) -> EntityId {
        EntityId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Allocate `preferred` if it does not collide with any id handed out so
    /// far; otherwise fall back to the next automatic id.
    pub fn allocate_preferred(&self, preferred: u64) -> EntityId {
        let mut current = self.next.load(Ordering::Relaxed);
        while preferred >= current {
            match self.next.compare_exchange_weak(
                current,
                preferred + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return EntityId(preferred),
                Err(observed) => current = observed,
            }
        }
        self.allocate()
    }

    /// Number of ids handed out so far (the exclusive upper bound of them).
    #[inline]
    pub fn watermark(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}
