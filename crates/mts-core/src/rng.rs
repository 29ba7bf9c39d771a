//! Deterministic per-entity and run-level RNG wrappers.
//!
//! # Determinism strategy
//!
//! Each entity gets its own independent `SmallRng` seeded by:
//!
//!   seed = run_seed XOR (entity_id * MIXING_CONSTANT)
//!
//! The mixing constant is the 64-bit fractional part of the golden ratio,
//! which spreads consecutive entity ids uniformly across the seed space.
//! Consequences:
//!
//! - Entities never share RNG state, so draws are independent of worker
//!   scheduling and of entity update order across threads.
//! - Adding entities mid-run does not disturb the streams of existing ones.
//! - The same `(run_seed, entity_id)` pair always reproduces the same
//!   stream, which is what makes two-worker runs bit-compatible with
//!   single-worker runs.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::EntityId;

/// 64-bit fractional golden-ratio constant for seed mixing.
const MIXING_CONSTANT: u64 = 0x9e37_79b9_7f4a_7c15;

// ── EntityRng ─────────────────────────────────────────────────────────────────

/// Per-entity deterministic RNG.
///
/// Created once when the entity is constructed and carried with it across
/// worker migrations.  `Send` but deliberately not shared: every draw happens
/// on the thread that currently owns the entity.
#[derive(Debug)]
pub struct EntityRng(SmallRng);

impl EntityRng {
    /// Seed deterministically from the run seed and an entity id.
    pub fn new(run_seed: u64, entity: EntityId) -> Self {
        let seed = run_seed ^ entity.0.wrapping_mul(MIXING_CONSTANT);
        EntityRng(SmallRng::seed_from_u64(seed))
    }

    /// Generate a value uniformly in `range`.
    #[inline]
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.0.gen_range(range)
    }

    /// `true` with probability `p` (clamped to [0, 1]).
    #[inline]
    pub fn gen_bool(&mut self, p: f64) -> bool {
        self.0.gen_bool(p.clamp(0.0, 1.0))
    }

    /// Choose a random element from a slice; `None` if the slice is empty.
    #[inline]
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        use rand::seq::SliceRandom;
        slice.choose(&mut self.0)
    }
}

// ── RunRng ────────────────────────────────────────────────────────────────────

/// Run-level RNG for global draws (demand generation, exogenous events).
///
/// Only touched from the main thread.  Per-entity randomness never comes from
/// here — it comes from [`EntityRng`].
#[derive(Debug)]
pub struct RunRng(SmallRng);

impl RunRng {
    pub fn new(seed: u64) -> Self {
        RunRng(SmallRng::seed_from_u64(seed))
    }

    /// Derive a child seed deterministically — used to give collaborator
    /// subsystems their own streams without sharing state.
    pub fn child_seed(&mut self, offset: u64) -> u64 {
        self.0.r#gen::<u64>() ^ offset.wrapping_mul(MIXING_CONSTANT)
    }

    #[inline]
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.0.gen_range(range)
    }
}
