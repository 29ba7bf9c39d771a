//! Kernel-integrity fault latch and population accounting.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use thiserror::Error;

use mts_core::{EntityId, LinkId, SegmentId};

// ── KernelFault ───────────────────────────────────────────────────────────────

/// A fault after which simulation state can no longer be trusted.
///
/// Per-entity problems (bad trip topology, a panicking role tick) are *not*
/// kernel faults — they retire the entity and the run continues.  These
/// variants mean the kernel itself diverged and must abort.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum KernelFault {
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("entity {0} was added to two workers")]
    MigrationRace(EntityId),

    #[error("virtual queue for link {link} admitted past its bound")]
    VirtualQueueOverflow { link: LinkId },

    #[error("person references segment {segment} owned by no conflux")]
    UnownedSegment { segment: SegmentId },

    #[error("worker thread panicked outside an entity update: {0}")]
    WorkerPanic(String),
}

// ── ErrorLatch ────────────────────────────────────────────────────────────────

/// A write-once fault flag shared by all workers and the main thread.
///
/// Workers raise; the main thread checks after every barrier and tears the
/// run down when set.  The first fault wins — later ones are side effects of
/// the first and would only obscure it.
#[derive(Default)]
pub struct ErrorLatch {
    raised: AtomicBool,
    cause: Mutex<Option<KernelFault>>,
}

impl ErrorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `fault` unless a fault is already latched.
    pub fn raise(&self, fault: KernelFault) {
        let mut cause = self.cause.lock().expect("latch lock poisoned");
        if cause.is_none() {
            *cause = Some(fault);
            self.raised.store(true, Ordering::Release);
        }
    }

    /// Cheap check — the hot-path read the main thread performs per barrier.
    #[inline]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// The latched fault, if any.
    pub fn fault(&self) -> Option<KernelFault> {
        self.cause.lock().expect("latch lock poisoned").clone()
    }
}

// ── PopulationCensus ──────────────────────────────────────────────────────────

/// Run-wide creation/retirement counters.
///
/// Every person counts exactly once on each side, no matter which conflux or
/// worker retires it — this is what the conservation invariant (persons in
/// lanes + virtual queues + activity lists + pending + done = created) and
/// the "run until drained" stop condition are checked against.
#[derive(Default, Debug)]
pub struct PopulationCensus {
    created: AtomicU64,
    retired: AtomicU64,
}

impl PopulationCensus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_retired(&self) {
        self.retired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn retired(&self) -> u64 {
        self.retired.load(Ordering::Relaxed)
    }

    /// `true` once every created entity has been retired.
    pub fn all_retired(&self) -> bool {
        // Read retired first: a concurrent create between the two loads can
        // only make this report "not drained", never a false "drained".
        let retired = self.retired();
        retired == self.created()
    }

    /// Entities currently alive (created − retired).
    pub fn live(&self) -> u64 {
        self.created().saturating_sub(self.retired())
    }
}
