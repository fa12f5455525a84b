//! Atomic primitives used by the free-lists and the epoch/refcount counters.
//!
//! Kept as a thin, named module (rather than scattering `std::sync::atomic`
//! calls across the free-list code) so the handful of places that need a
//! full barrier — as opposed to an acquire/release pair — are easy to find
//! and audit.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

/// CAS-loop push/pop head shared by the memory pool and the swap manager.
/// `next_free` and `is_free` live outside the page's mutex (see `PageFrame`);
/// this type only ever touches the head index itself.
#[derive(Debug, Default)]
pub(crate) struct FreeListHead(AtomicU32);

impl FreeListHead {
    pub fn new(initial: u32) -> Self {
        Self(AtomicU32::new(initial))
    }

    pub fn load(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }

    pub fn compare_exchange(&self, current: u32, new: u32) -> Result<u32, u32> {
        self.0
            .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
    }

    pub fn store(&self, value: u32) {
        self.0.store(value, Ordering::Release);
    }
}

/// Monotonically increasing 64-bit counter (keydir epoch, and the handle's
/// refcount before an `Arc` does the same job for us).
#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicU64);

impl Counter {
    pub fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn store(&self, value: u64) {
        self.0.store(value, Ordering::Release);
    }

    /// Returns the *new* value, i.e. the epoch stamped on the caller's entry.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Full memory barrier. Used once, before reading the swap free-list head in
/// the empty-list expansion check (`SwapManager::grow`), so that
/// `num_swap_pages` is observed coherently with respect to a concurrent
/// expansion that already published its segment.
pub(crate) fn full_barrier() {
    fence(Ordering::SeqCst);
}
