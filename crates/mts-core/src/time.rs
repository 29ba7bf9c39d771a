//! Simulation time model.
//!
//! # Design
//!
//! Time is a monotonically increasing frame counter with a fixed tick length
//! of `base_gran_ms` milliseconds.  A [`Timeslice`] carries both the frame
//! number and its millisecond offset from the simulation epoch so that code
//! never re-derives one from the other with its own arithmetic:
//!
//! ```text
//! ms = frame * base_gran_ms
//! ```
//!
//! Wall-clock mapping (`sim_start_ms` = Unix milliseconds of frame 0) lives in
//! [`SimClock`]; the kernel itself only ever compares frames and offsets.

use std::fmt;

// ── Timeslice ─────────────────────────────────────────────────────────────────

/// One discrete simulation step: the frame counter plus its millisecond
/// offset from the simulation epoch.
///
/// Constructed only by [`SimClock`] (or by tests) so the `frame`/`ms`
/// relationship stays consistent with the configured granularity.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timeslice {
    /// Frame number, starting at 0.
    pub frame: u64,
    /// Milliseconds since the simulation epoch: `frame * base_gran_ms`.
    pub ms: u64,
}

impl Timeslice {
    pub const ZERO: Timeslice = Timeslice { frame: 0, ms: 0 };

    #[inline]
    pub fn new(frame: u64, base_gran_ms: u32) -> Self {
        Self { frame, ms: frame * base_gran_ms as u64 }
    }

    /// The timeslice `n` frames after `self` at the given granularity.
    #[inline]
    pub fn offset(self, n: u64, base_gran_ms: u32) -> Self {
        Timeslice::new(self.frame + n, base_gran_ms)
    }
}

impl fmt::Display for Timeslice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}@{}ms", self.frame, self.ms)
    }
}

// ── SimClock ──────────────────────────────────────────────────────────────────

/// Converts between frame counts and wall-clock milliseconds, and tracks the
/// current frame of the driving thread.
///
/// Cheap to copy; intentionally holds no heap data.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SimClock {
    /// Unix milliseconds corresponding to frame 0.
    pub sim_start_ms: i64,
    /// Tick length in milliseconds.  Always > 0.
    pub base_gran_ms: u32,
    /// The current frame — advanced by [`SimClock::advance`] each iteration.
    pub current_frame: u64,
}

impl SimClock {
    pub fn new(sim_start_ms: i64, base_gran_ms: u32) -> Self {
        Self { sim_start_ms, base_gran_ms, current_frame: 0 }
    }

    /// The current tick as a [`Timeslice`].
    #[inline]
    pub fn now(&self) -> Timeslice {
        Timeslice::new(self.current_frame, self.base_gran_ms)
    }

    /// Advance the clock by one frame.
    #[inline]
    pub fn advance(&mut self) {
        self.current_frame += 1;
    }

    /// Elapsed simulated milliseconds since frame 0.
    #[inline]
    pub fn elapsed_ms(&self) -> u64 {
        self.current_frame * self.base_gran_ms as u64
    }

    /// Wall-clock Unix milliseconds of the current frame.
    #[inline]
    pub fn current_unix_ms(&self) -> i64 {
        self.sim_start_ms + self.elapsed_ms() as i64
    }

    /// How many frames span `ms` milliseconds? (rounds up — never early)
    #[inline]
    pub fn frames_for_ms(&self, ms: u64) -> u64 {
        ms.div_ceil(self.base_gran_ms as u64)
    }
}

impl fmt::Display for SimClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.now())
    }
}
