//! Counters published by the pool engine.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Snapshot of allocator statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreallocStats {
    /// Blocks currently cached.
    pub cached: usize,
    /// Blocks handed to callers. A block sent to a caller that stopped
    /// waiting before reading it is not counted.
    pub served: u64,
    /// Completed background refills.
    pub refills: u64,
    /// Blocks received from the backend, initial fill included.
    pub allocated: u64,
    /// Whether the engine stopped because a refill failed.
    pub refill_failed: bool,
    /// Whether the allocator has been closed.
    pub closed: bool,
}

/// Atomic counters behind [`PreallocStats`].
///
/// Written by the engine task only; readers get a racy but consistent
/// enough snapshot.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    cached: AtomicUsize,
    served: AtomicU64,
    refills: AtomicU64,
    allocated: AtomicU64,
    refill_failed: AtomicBool,
    closed: AtomicBool,
}

impl Counters {
    pub(crate) fn set_cached(&self, cached: usize) {
        self.cached.store(cached, Ordering::Release);
    }

    pub(crate) fn record_allocated(&self, count: usize) {
        self.allocated.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_refill(&self, count: usize) {
        self.refills.fetch_add(1, Ordering::Relaxed);
        self.record_allocated(count);
    }

    pub(crate) fn record_served(&self) {
        self.served.fetch_add(1, Ordering::Relaxed);
    }

    /// Undo a `record_served` for a block the caller never read.
    pub(crate) fn record_unclaimed(&self) {
        let _ = self
            .served
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub(crate) fn mark_refill_failed(&self) {
        self.refill_failed.store(true, Ordering::Release);
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn snapshot(&self) -> PreallocStats {
        PreallocStats {
            cached: self.cached.load(Ordering::Acquire),
            served: self.served.load(Ordering::Relaxed),
            refills: self.refills.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
            refill_failed: self.refill_failed.load(Ordering::Acquire),
            closed: self.closed.load(Ordering::Acquire),
        }
    }
}
