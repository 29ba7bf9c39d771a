//! Top-level simulation configuration.

use crate::error::{MtsError, MtsResult};

// ── MutexStrategy ─────────────────────────────────────────────────────────────

/// How shared cells isolate cross-thread reads from same-tick writes.
///
/// Both strategies satisfy the tick contract (a read never changes value
/// between the two barriers); they differ only in cost profile.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MutexStrategy {
    /// Double-buffered slots flipped at the barrier.  Reads are plain loads.
    #[default]
    Buffered,
    /// A lock around the (current, next) pair.  Every access pays the lock;
    /// useful for debugging memory-ordering suspicions.
    Locked,
}

// ── SimConfig ─────────────────────────────────────────────────────────────────

/// Configuration for one simulation run.
///
/// Parsing config files is the application's job; the kernel receives this
/// struct fully formed and validates it once, before the first tick.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimConfig {
    /// Tick length in milliseconds.  Must be > 0.
    pub base_gran_ms: u32,

    /// Unix milliseconds corresponding to frame 0.
    pub sim_start_ms: i64,

    /// Number of ticks to execute (frames 0..end_tick).  0 means "run until
    /// every entity is done".
    pub end_tick: u64,

    /// Per-work-group stride: the group advances once per `tick_step` main
    /// ticks.  Must be ≥ 1.
    pub tick_step: u32,

    /// Shared-cell isolation strategy.
    pub mutex_strategy: MutexStrategy,

    /// Master RNG seed.  The same seed always produces identical results.
    pub seed: u64,

    /// Worker thread count.  Must be ≥ 1.
    pub num_workers: usize,

    /// Whether the aura spatial index is rebuilt each tick (costs a second
    /// external-barrier phase).
    pub aura_active: bool,
}

impl SimConfig {
    /// Check field-level validity.  A failing config is fatal before the
    /// first tick.
    pub fn validate(&self) -> MtsResult<()> {
        if self.base_gran_ms == 0 {
            return Err(MtsError::Config("base_gran_ms must be > 0".into()));
        }
        if self.tick_step == 0 {
            return Err(MtsError::Config("tick_step must be >= 1".into()));
        }
        if self.num_workers == 0 {
            return Err(MtsError::Config("num_workers must be >= 1".into()));
        }
        Ok(())
    }

    /// Construct a clock pre-configured for this run.
    pub fn make_clock(&self) -> crate::SimClock {
        crate::SimClock::new(self.sim_start_ms, self.base_gran_ms)
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            base_gran_ms: 100,
            sim_start_ms: 0,
            end_tick: 0,
            tick_step: 1,
            mutex_strategy: MutexStrategy::Buffered,
            seed: 0,
            num_workers: 1,
            aura_active: false,
        }
    }
}
