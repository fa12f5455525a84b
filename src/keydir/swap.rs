//! Swap-file manager: an mmap-backed pool of pages, the same free-list
//! discipline as `pool::MemoryPool`, and a doubling expansion protocol
//! serialized by `swap_grow_mutex` (§4.2).

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;

use memmap2::MmapOptions;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::common::{KeydirError, KeydirResult};
use crate::config::{PAGE_SIZE_BYTES, SWAP_FILE_NAME};
use crate::keydir::atomics::{self, FreeListHead};
use crate::keydir::page::{PageFrame, PageGuard, PageSlot, MAX_PAGE_IDX};

pub(crate) struct SwapManager {
    file: StdMutex<File>,
    /// Segments of the unified swap index space, in creation order.
    /// Global swap-local index `i` lives in the first segment whose
    /// cumulative length exceeds `i` (§4.2, "Lookup by index walks segments,
    /// summing sizes").
    segments: RwLock<Vec<Box<[PageFrame]>>>,
    free_head: FreeListHead,
    num_swap_pages: AtomicU32,
    grow_mutex: StdMutex<()>,
}

impl SwapManager {
    pub fn new(basedir: &Path, initial_pages: usize) -> KeydirResult<Self> {
        let path = basedir.join(SWAP_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .mode(0o600)
            .open(&path)?;
        file.set_len((initial_pages.max(1) * PAGE_SIZE_BYTES) as u64)?;

        let mut frames = Vec::with_capacity(initial_pages);
        for i in 0..initial_pages {
            let mmap = map_page(&file, i)?;
            frames.push(PageFrame::new(PageSlot::new_swap(mmap), true, MAX_PAGE_IDX));
        }
        for i in 0..frames.len().saturating_sub(1) {
            frames[i].store_next_free((i + 1) as u32);
        }

        info!(pages = initial_pages, path = %path.display(), "swap file initialized");

        Ok(Self {
            file: StdMutex::new(file),
            segments: RwLock::new(vec![frames.into_boxed_slice()]),
            free_head: FreeListHead::new(if initial_pages == 0 { MAX_PAGE_IDX } else { 0 }),
            num_swap_pages: AtomicU32::new(initial_pages as u32),
            grow_mutex: StdMutex::new(()),
        })
    }

    pub fn num_pages(&self) -> u32 {
        self.num_swap_pages.load(Ordering::Acquire)
    }

    /// Truncate the swap file to zero bytes. Called once, from the
    /// keydir's `Drop` (§6: "truncated... to zero bytes during shutdown").
    pub fn shutdown(&self) {
        if let Ok(file) = self.file.lock() {
            let _ = file.set_len(0);
        }
    }

    fn with_frame<R>(&self, local_idx: u32, f: impl FnOnce(&PageFrame) -> R) -> R {
        let segs = self.segments.read();
        let mut base = 0u32;
        for seg in segs.iter() {
            let len = seg.len() as u32;
            if local_idx < base + len {
                return f(&seg[(local_idx - base) as usize]);
            }
            base += len;
        }
        unreachable!("swap page index {} out of range ({} pages)", local_idx, base);
    }

    pub fn lock(&self, local_idx: u32) -> PageGuard {
        self.with_frame(local_idx, |frame| frame.lock())
    }

    pub fn try_lock(&self, local_idx: u32) -> Option<PageGuard> {
        self.with_frame(local_idx, |frame| frame.try_lock())
    }

    /// Pop a swap page off the free-list, or `None` if it's currently empty
    /// (the caller should then call `grow` and retry).
    pub fn try_alloc(&self) -> Option<(u32, PageGuard)> {
        atomics::full_barrier();
        loop {
            let head = self.free_head.load();
            if head == MAX_PAGE_IDX {
                return None;
            }
            let outcome = self.with_frame(head, |frame| {
                let next = frame.load_next_free();
                if self.free_head.compare_exchange(head, next).is_err() {
                    return None;
                }
                let guard = frame.lock();
                if frame.load_is_free() {
                    frame.store_is_free(false);
                    Some(guard)
                } else {
                    // Lost a race between the CAS and the lock; restart.
                    None
                }
            });
            if let Some(guard) = outcome {
                return Some((head, guard));
            }
        }
    }

    /// `try_alloc`, growing the pool as many times as it takes to succeed.
    /// Used by the unified allocator and by the alt-page spill path, neither
    /// of which has a useful fallback of its own if swap is momentarily empty.
    pub fn try_alloc_or_grow(&self) -> KeydirResult<(u32, PageGuard)> {
        loop {
            if let Some(r) = self.try_alloc() {
                return Ok(r);
            }
            self.grow(self.num_pages())?;
        }
    }

    pub fn release(&self, local_idx: u32, mut guard: PageGuard) {
        guard.reset();
        self.with_frame(local_idx, |frame| {
            frame.store_is_free(true);
            drop(guard);
            loop {
                let head = self.free_head.load();
                frame.store_next_free(head);
                if self.free_head.compare_exchange(head, local_idx).is_ok() {
                    break;
                }
            }
        });
    }

    /// Double the swap file and page pool. Idempotent with respect to races:
    /// if another thread already grew the pool past `observed`, this is a
    /// no-op and the caller's subsequent `try_alloc` will see the new pages.
    pub fn grow(&self, observed: u32) -> KeydirResult<()> {
        let _guard = self
            .grow_mutex
            .lock()
            .map_err(|e| KeydirError::LockPoisoned(e.to_string()))?;
        if self.num_swap_pages.load(Ordering::Acquire) != observed {
            return Ok(());
        }

        let old_total = observed as usize;
        let new_total = (old_total.max(1)) * 2;

        let file = self
            .file
            .lock()
            .map_err(|e| KeydirError::LockPoisoned(e.to_string()))?;
        file.set_len((new_total * PAGE_SIZE_BYTES) as u64)?;

        let mut new_frames = Vec::with_capacity(new_total - old_total);
        for i in old_total..new_total {
            match map_page(&file, i) {
                Ok(mmap) => new_frames.push(PageFrame::new(PageSlot::new_swap(mmap), true, MAX_PAGE_IDX)),
                Err(e) => {
                    warn!(error = %e, mapped = new_frames.len(), "partial mmap failure during swap growth");
                    break;
                }
            }
        }
        drop(file);

        let mapped = new_frames.len();
        if mapped == 0 {
            return Err(KeydirError::OutOfMemory(
                "swap expansion mapped zero pages".into(),
            ));
        }

        for i in 0..mapped.saturating_sub(1) {
            new_frames[i].store_next_free((old_total + i + 1) as u32);
        }
        let seg_base = old_total as u32;

        {
            let mut segs = self.segments.write();
            segs.push(new_frames.into_boxed_slice());
        }

        // Splice the new segment onto the existing free-list, CAS'ing the
        // head in case a concurrent allocator is racing us.
        let last_idx = seg_base + mapped as u32 - 1;
        self.with_frame(last_idx, |last_frame| loop {
            let head = self.free_head.load();
            last_frame.store_next_free(head);
            if self.free_head.compare_exchange(head, seg_base).is_ok() {
                break;
            }
        });

        self.num_swap_pages
            .store((old_total + mapped) as u32, Ordering::Release);
        info!(old_total, new_total = old_total + mapped, "swap file grown");
        debug!(requested = new_total, mapped, "swap expansion detail");
        Ok(())
    }
}

fn map_page(file: &File, page_index: usize) -> std::io::Result<memmap2::MmapMut> {
    unsafe {
        MmapOptions::new()
            .offset((page_index * PAGE_SIZE_BYTES) as u64)
            .len(PAGE_SIZE_BYTES)
            .map_mut(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_basedir(name: &str) -> std::path::PathBuf {
        crate::utils::test_dir(format!("swap_{}", name))
    }

    #[test]
    fn alloc_release_roundtrip() {
        let dir = temp_basedir("alloc_release");
        let swap = SwapManager::new(&dir, 4).unwrap();
        let mut got = Vec::new();
        for _ in 0..4 {
            got.push(swap.try_alloc().expect("should have pages"));
        }
        assert!(swap.try_alloc().is_none());
        for (idx, guard) in got {
            swap.release(idx, guard);
        }
        assert!(swap.try_alloc().is_some());
    }

    #[test]
    fn grow_doubles_and_preserves_existing_pages() {
        let dir = temp_basedir("grow");
        let swap = SwapManager::new(&dir, 2).unwrap();
        let (idx0, mut guard0) = swap.try_alloc().unwrap();
        guard0.data.as_mut_slice()[0] = 0xAB;
        drop(guard0);
        let (idx1, _guard1) = swap.try_alloc().unwrap();
        assert!(swap.try_alloc().is_none());

        swap.grow(swap.num_pages()).unwrap();
        assert_eq!(swap.num_pages(), 4);

        let (idx2, _guard2) = swap.try_alloc().expect("grown pool should have free pages");
        assert_ne!(idx2, idx0);
        assert_ne!(idx2, idx1);

        let reread = swap.lock(idx0);
        assert_eq!(reread.data.as_slice()[0], 0xAB);
    }
}
