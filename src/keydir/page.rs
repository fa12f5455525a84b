//! The page structure shared by resident memory pages and mmap-backed swap
//! pages, and the per-page locking/free-list wrapper around it.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use lock_api::ArcMutexGuard;
use memmap2::MmapMut;
use parking_lot::{Mutex, RawMutex};

use crate::config::PAGE_SIZE_BYTES;

/// "No page" sentinel, shared by `prev`, `next`, `next_free` and `alt_idx`.
pub const MAX_PAGE_IDX: u32 = u32::MAX;

/// Owned, independently-droppable guard on a page's data. Obtained via
/// `PageFrame::lock`/`try_lock`. Because it owns its own `Arc` clone of the
/// page's mutex, a `ScanIterator` can hold an arbitrary number of these in a
/// plain `Vec` without running into the self-referential-struct problem a
/// borrowed `MutexGuard<'a, _>` would create.
pub(crate) type PageGuard = ArcMutexGuard<RawMutex, PageSlot>;

/// The backing byte buffer of a page: either an owned 4 KiB array (resident
/// memory page) or an individually-mmapped range of the swap file.
pub(crate) enum PageData {
    Memory(Box<[u8; PAGE_SIZE_BYTES]>),
    Swap(MmapMut),
}

impl PageData {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            PageData::Memory(buf) => buf.as_slice(),
            PageData::Swap(mmap) => &mmap[..],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            PageData::Memory(buf) => buf.as_mut_slice(),
            PageData::Swap(mmap) => &mut mmap[..],
        }
    }
}

/// Data mutated only under the page's mutex (`PageFrame::slot`), with two
/// exceptions carved out in the concurrency model: `is_free` and the
/// free-list linkage, which live in `PageFrame` itself and are touched by
/// CAS loops instead.
pub(crate) struct PageSlot {
    pub data: PageData,
    /// Previous page in the chain, or `MAX_PAGE_IDX` if this is the head.
    pub prev: u32,
    /// Next page in the chain, or `MAX_PAGE_IDX` if this is the tail.
    pub next: u32,
    /// Bytes committed at the chain head. Meaningful only on the page that
    /// currently heads a chain (a base memory page, or the alt swap page it
    /// delegated to).
    pub size: u32,
    /// Set on a base memory page once its data has been relocated to a swap
    /// page; `MAX_PAGE_IDX` otherwise. Meaningless on non-base pages.
    pub alt_idx: u32,
    /// Bytes in this chain made obsolete by in-place overwrites or
    /// tombstoning, tracked so compaction heuristics (outside this crate)
    /// have something to act on.
    pub dead_bytes: u32,
    /// True iff this memory slot's hash bucket is idle and the slot is on
    /// loan as overflow space for a different key's chain.
    pub is_borrowed: bool,
}

impl PageSlot {
    pub fn new_memory() -> Self {
        Self {
            data: PageData::Memory(Box::new([0u8; PAGE_SIZE_BYTES])),
            prev: MAX_PAGE_IDX,
            next: MAX_PAGE_IDX,
            size: 0,
            alt_idx: MAX_PAGE_IDX,
            dead_bytes: 0,
            is_borrowed: false,
        }
    }

    pub fn new_swap(mmap: MmapMut) -> Self {
        Self {
            data: PageData::Swap(mmap),
            prev: MAX_PAGE_IDX,
            next: MAX_PAGE_IDX,
            size: 0,
            alt_idx: MAX_PAGE_IDX,
            dead_bytes: 0,
            is_borrowed: false,
        }
    }

    /// Reset a page to the empty state it had when it was last handed out by
    /// the free-list. Called by the owner right before releasing it back.
    pub fn reset(&mut self) {
        self.data.as_mut_slice().fill(0);
        self.prev = MAX_PAGE_IDX;
        self.next = MAX_PAGE_IDX;
        self.size = 0;
        self.alt_idx = MAX_PAGE_IDX;
        self.dead_bytes = 0;
        self.is_borrowed = false;
    }
}

/// One slot in the unified page-index space: the lock-free free-list
/// linkage (`next_free`, `is_free`) plus the mutex-guarded page body.
pub(crate) struct PageFrame {
    pub next_free: AtomicU32,
    pub is_free: AtomicBool,
    slot: Arc<Mutex<PageSlot>>,
}

impl PageFrame {
    pub fn new(slot: PageSlot, is_free: bool, next_free: u32) -> Self {
        Self {
            next_free: AtomicU32::new(next_free),
            is_free: AtomicBool::new(is_free),
            slot: Arc::new(Mutex::new(slot)),
        }
    }

    pub fn lock(&self) -> PageGuard {
        self.slot.clone().lock_arc()
    }

    pub fn try_lock(&self) -> Option<PageGuard> {
        self.slot.clone().try_lock_arc()
    }

    pub fn load_is_free(&self) -> bool {
        self.is_free.load(Ordering::Acquire)
    }

    pub fn store_is_free(&self, value: bool) {
        self.is_free.store(value, Ordering::Release);
    }

    pub fn load_next_free(&self) -> u32 {
        self.next_free.load(Ordering::Acquire)
    }

    pub fn store_next_free(&self, value: u32) {
        self.next_free.store(value, Ordering::Release);
    }
}
