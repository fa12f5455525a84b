//! Fixed-size pool of resident memory pages and its lock-free free-list.
//!
//! Grounded on the allocation/release CAS loop described for the swap
//! manager (§4.2) and shared verbatim with the memory pool (§4.1): pop via
//! CAS on the free-list head, lock the page, and re-verify `is_free` before
//! handing it to the caller, since another thread can win a race between the
//! CAS and the lock.

use crate::common::{KeydirError, KeydirResult};
use crate::keydir::atomics::FreeListHead;
use crate::keydir::page::{PageFrame, PageGuard, PageSlot, MAX_PAGE_IDX};

pub(crate) struct MemoryPool {
    frames: Box<[PageFrame]>,
    free_head: FreeListHead,
}

impl MemoryPool {
    pub fn new(n: usize) -> KeydirResult<Self> {
        if n == 0 {
            return Err(KeydirError::InvalidInput(
                "num_pages must be greater than zero".into(),
            ));
        }

        let order = strided_order(n, crate::config::FREE_LIST_STRIDE);
        let mut next_free_of = vec![MAX_PAGE_IDX; n];
        for window in order.windows(2) {
            next_free_of[window[0] as usize] = window[1];
        }

        let frames: Vec<PageFrame> = (0..n)
            .map(|i| PageFrame::new(PageSlot::new_memory(), true, next_free_of[i]))
            .collect();

        Ok(Self {
            frames: frames.into_boxed_slice(),
            free_head: FreeListHead::new(order[0]),
        })
    }

    /// Cheap, racy peek at whether the free-list looks empty. Used only as
    /// a heuristic trigger for the alt-page spill (§9 "memory pressure"),
    /// never for correctness: whichever way the race resolves, the actual
    /// allocation path below still handles both memory and swap safely.
    pub fn is_likely_empty(&self) -> bool {
        self.free_head.load() == MAX_PAGE_IDX
    }

    pub fn frame(&self, idx: u32) -> &PageFrame {
        &self.frames[idx as usize]
    }

    /// Pop a page off the free-list. Returns the page locked, per §4.3
    /// ("Returned pages are always returned locked").
    pub fn try_alloc(&self) -> Option<(u32, PageGuard)> {
        loop {
            let head = self.free_head.load();
            if head == MAX_PAGE_IDX {
                return None;
            }
            let frame = &self.frames[head as usize];
            let next = frame.load_next_free();
            if self.free_head.compare_exchange(head, next).is_ok() {
                let guard = frame.lock();
                if frame.load_is_free() {
                    frame.store_is_free(false);
                    return Some((head, guard));
                }
                // Lost a race with another allocator between the CAS and the
                // lock; this page is already spoken for. Restart.
                drop(guard);
                continue;
            }
        }
    }

    /// Push a page back onto the free-list. `guard` must be held on entry
    /// (the caller is expected to have reset the slot first) and is dropped
    /// before the CAS push, matching "sets is_free before splicing" (§4.1).
    pub fn release(&self, idx: u32, mut guard: PageGuard) {
        guard.reset();
        let frame = &self.frames[idx as usize];
        frame.store_is_free(true);
        drop(guard);
        loop {
            let head = self.free_head.load();
            frame.store_next_free(head);
            if self.free_head.compare_exchange(head, idx).is_ok() {
                break;
            }
        }
    }
}

/// Threads the free-list in a strided, wrapping order instead of `0..n`
/// sequentially: spreads consecutively-hashed keys' base pages across the
/// backing array, so threads that concurrently borrow adjacent hash slots
/// don't fight over the same cache lines. Guarantees every index in `0..n`
/// appears exactly once regardless of whether `stride` divides `n`.
fn strided_order(n: usize, stride: usize) -> Vec<u32> {
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut start = 0usize;
    while order.len() < n {
        if !visited[start] {
            let mut idx = start;
            while !visited[idx] {
                visited[idx] = true;
                order.push(idx as u32);
                idx = (idx + stride) % n;
            }
        }
        start += 1;
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strided_order_is_a_permutation() {
        for n in [1usize, 2, 3, 7, 16, 17, 100] {
            let order = strided_order(n, 16);
            let mut seen = vec![false; n];
            assert_eq!(order.len(), n);
            for idx in &order {
                assert!(!seen[*idx as usize], "index {} repeated for n={}", idx, n);
                seen[*idx as usize] = true;
            }
        }
    }

    #[test]
    fn alloc_release_roundtrip() {
        let pool = MemoryPool::new(4).unwrap();
        let mut got = Vec::new();
        for _ in 0..4 {
            let (idx, guard) = pool.try_alloc().expect("pool should have pages");
            got.push((idx, guard));
        }
        assert!(pool.try_alloc().is_none(), "pool should be exhausted");
        for (idx, guard) in got {
            pool.release(idx, guard);
        }
        assert!(pool.try_alloc().is_some());
    }
}
