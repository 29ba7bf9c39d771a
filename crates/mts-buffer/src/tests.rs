//! Unit tests for mts-buffer.

use mts_core::MutexStrategy;

use crate::{BufferRegistry, Shared};

// ── Shared cell semantics ─────────────────────────────────────────────────────

#[cfg(test)]
mod cell {
    use super::*;

    #[test]
    fn set_is_invisible_until_flip() {
        for strategy in [MutexStrategy::Buffered, MutexStrategy::Locked] {
            let mut pos = Shared::new(strategy, 10i64);
            let reader = pos.reader();

            pos.set(25);
            // Within the tick: both handles still see the committed value.
            assert_eq!(pos.get(), 10);
            assert_eq!(reader.get(), 10);

            // The flip applies membership and commits in the same batch.
            let mut registry = BufferRegistry::new();
            registry.queue_add(pos.registration());
            registry.flip_all();
            assert_eq!(pos.get(), 25);
            assert_eq!(reader.get(), 25);
        }
    }

    #[test]
    fn repeated_reads_within_tick_are_stable() {
        let mut cell = Shared::new(MutexStrategy::Buffered, 1u32);
        let reader = cell.reader();
        cell.set(2);
        cell.set(3);
        // No flip has happened: every read this tick returns the same value.
        let reads: Vec<u32> = (0..16).map(|_| reader.get()).collect();
        assert!(reads.iter().all(|&v| v == 1));
    }

    #[test]
    fn force_writes_both_slots() {
        let mut cell = Shared::new(MutexStrategy::Buffered, 0i32);
        cell.set(7); // would-be next value
        cell.force(99);
        assert_eq!(cell.get(), 99);
        assert_eq!(cell.snapshot(), (99, 99)); // the staged 7 is gone

        let mut registry = BufferRegistry::new();
        registry.queue_add(cell.registration());
        registry.flip_all();
        assert_eq!(cell.get(), 99);
    }

    #[test]
    fn last_set_wins_at_flip() {
        let mut cell = Shared::new(MutexStrategy::Locked, 0u8);
        let mut registry = BufferRegistry::new();
        registry.queue_add(cell.registration());
        registry.flip_all();

        cell.set(1);
        cell.set(2);
        cell.set(3);
        registry.flip_all();
        assert_eq!(cell.get(), 3);
    }

    #[test]
    fn cross_thread_readers_see_committed_value() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let mut cell = Shared::new(MutexStrategy::Buffered, 0u64);
        let reader = cell.reader();
        let mut registry = BufferRegistry::new();
        registry.queue_add(cell.registration());
        registry.flip_all();

        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = Arc::clone(&stop);
        // Reader thread mimics an entity polling another entity's position
        // during the update phase: only 0 (committed) may ever be observed.
        let handle = std::thread::spawn(move || {
            let mut observed = Vec::new();
            while !stop2.load(Ordering::Acquire) {
                observed.push(reader.get());
            }
            observed
        });

        for v in 1..=100u64 {
            cell.set(v); // writes land in the hidden slot
        }
        stop.store(true, Ordering::Release);
        let observed = handle.join().unwrap();
        assert!(observed.iter().all(|&v| v == 0));
    }
}

// ── Registry deltas ───────────────────────────────────────────────────────────

#[cfg(test)]
mod registry {
    use super::*;

    #[test]
    fn add_takes_effect_next_flip() {
        let mut cell = Shared::new(MutexStrategy::Buffered, 0i64);
        cell.set(5);

        let mut registry = BufferRegistry::new();
        registry.queue_add(cell.registration());
        assert_eq!(registry.len(), 0, "adds are deferred");

        // First flip applies the membership; the cell is flipped in the same
        // batch (it joined before the flipping pass).
        registry.flip_all();
        assert_eq!(registry.len(), 1);
        assert!(registry.owns(cell.id()));
        assert_eq!(cell.get(), 5);
    }

    #[test]
    fn remove_takes_effect_next_flip() {
        let mut cell = Shared::new(MutexStrategy::Buffered, 0i64);
        let mut registry = BufferRegistry::new();
        registry.queue_add(cell.registration());
        registry.flip_all();
        assert_eq!(registry.len(), 1);

        registry.queue_remove(cell.id());
        assert_eq!(registry.len(), 1, "removes are deferred");

        cell.set(42);
        registry.flip_all();
        assert_eq!(registry.len(), 0);
        // Cell no longer owned → the staged value was never committed.
        assert_eq!(cell.get(), 0);
    }

    #[test]
    fn unknown_remove_is_ignored() {
        let cell = Shared::new(MutexStrategy::Buffered, 0i64);
        let mut registry = BufferRegistry::new();
        registry.queue_remove(cell.id());
        registry.flip_all();
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_then_add_same_tick_keeps_cell() {
        // An entity migrating between registries in one tick produces
        // remove-then-add; order of application (removes first) must leave
        // the cell owned.
        let cell = Shared::new(MutexStrategy::Buffered, 1i64);
        let mut registry = BufferRegistry::new();
        registry.queue_add(cell.registration());
        registry.flip_all();

        registry.queue_remove(cell.id());
        registry.queue_add(cell.registration());
        registry.flip_all();
        assert!(registry.owns(cell.id()));
    }

    #[test]
    fn flip_count_reports_owned_cells() {
        let cells: Vec<Shared<i64>> =
            (0..4).map(|i| Shared::new(MutexStrategy::Buffered, i)).collect();
        let mut registry = BufferRegistry::new();
        for c in &cells {
            registry.queue_add(c.registration());
        }
        assert_eq!(registry.flip_all(), 4);
    }
}

// ── Serde round trip ──────────────────────────────────────────────────────────

#[cfg(all(test, feature = "serde"))]
mod serde_round_trip {
    use super::*;

    #[test]
    fn cell_round_trips_current_and_next() {
        let mut cell = Shared::new(MutexStrategy::Buffered, 11i64);
        cell.set(22); // next slot differs from current

        let json = serde_json::to_string(&cell).unwrap();
        let restored: Shared<i64> = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.snapshot(), (11, 22));
    }
}
