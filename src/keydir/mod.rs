//! The concurrent, epoch-versioned key directory (§3-§7): a page-based hash
//! table over a fixed memory pool with mmap-backed swap overflow.
//!
//! Submodules, leaves first: `atomics` (CAS/barrier primitives), `page`
//! (the shared page structure and its lock), `pool`/`swap` (the two
//! free-list-backed page sources), `allocator` (unified allocation plus
//! borrow/reclaim), `hash` (base-page selection), `entry` (on-page record
//! codec), `iterator` (chain walking), `fstats` (per-file counters). This
//! file wires them into the public `Keydir` handle and the `get`/`put`/
//! `remove` operations (§4.5-§4.7).

mod allocator;
mod atomics;
pub mod entry;
mod fstats;
mod hash;
mod iterator;
mod page;
mod pool;
mod swap;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex as PlMutex;
use tracing::info;

use crate::common::{KeydirError, KeydirResult};
use crate::config;
use allocator::ReclaimOutcome;
use atomics::Counter;
pub use entry::EntryHeader;
use entry::{entry_size_for_key, version_size, ENTRY_HEADER_SIZE, MAX_FILE_ID, MAX_OFFSET};
pub use fstats::FileStats;
use fstats::FstatsTable;
use iterator::ScanIterator;
use page::{PageGuard, MAX_PAGE_IDX};
use pool::MemoryPool;
use swap::SwapManager;

/// A record to insert or overwrite, as the caller of `put` supplies it; the
/// keydir itself assigns `epoch` and links `next` (§6).
#[derive(Debug, Clone, Copy)]
pub struct Record {
    pub file_id: u32,
    pub total_size: u32,
    pub offset: u64,
    pub timestamp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Ok,
    Modified,
}

/// Process-resident, reference-counted handle (§3). Cheap to `Clone`; the
/// swap file is truncated and the mmaps dropped when the last clone goes
/// out of scope.
#[derive(Clone)]
pub struct Keydir {
    inner: Arc<KeydirInner>,
}

struct KeydirInner {
    basedir: PathBuf,
    n: u32,
    memory: MemoryPool,
    swap: SwapManager,
    epoch: Counter,
    min_epoch: Counter,
    fstats: PlMutex<FstatsTable>,
}

impl Keydir {
    /// Create a fresh keydir backed by `basedir/bitcask.swap`. `basedir` is
    /// created if it doesn't exist.
    pub fn init(
        basedir: impl AsRef<Path>,
        num_pages: usize,
        initial_swap_pages: usize,
    ) -> KeydirResult<Self> {
        let basedir = basedir.as_ref().to_path_buf();
        std::fs::create_dir_all(&basedir)?;
        let memory = MemoryPool::new(num_pages)?;
        let swap = SwapManager::new(&basedir, initial_swap_pages)?;
        info!(
            num_pages,
            initial_swap_pages,
            basedir = %basedir.display(),
            "keydir initialized"
        );
        Ok(Self {
            inner: Arc::new(KeydirInner {
                basedir,
                n: num_pages as u32,
                memory,
                swap,
                epoch: Counter::new(0),
                // No fold/snapshot is outstanding until `set_min_epoch` lowers
                // this; starting at MAX_EPOCH means ordinary writes with no
                // live snapshot take the in-place branch of `apply_update`
                // (§8 scenario 2), not the append branch.
                min_epoch: Counter::new(entry::MAX_EPOCH),
                fstats: PlMutex::new(FstatsTable::new()),
            }),
        })
    }

    /// Current value of the monotonically increasing epoch counter. Exposed
    /// so an external fold/merge/snapshot subsystem (out of scope here, per
    /// §1) can capture a point-in-time bound before reading.
    pub fn current_epoch(&self) -> u64 {
        self.inner.epoch.load()
    }

    /// Set the min_epoch watermark (§5, §9 "Epoch model"). Snapshot holders
    /// call this to tell writers which in-place overwrites are safe.
    pub fn set_min_epoch(&self, epoch: u64) {
        self.inner.min_epoch.store(epoch);
    }

    /// §4.5: look up `key` as of `epoch` (pass `entry::MAX_EPOCH` for the
    /// latest version). `None` is NOT_FOUND.
    pub fn get(&self, key: &[u8], epoch: u64) -> KeydirResult<Option<EntryHeader>> {
        let inner = &*self.inner;
        let base_idx = hash::base_page(key, config::HASH_SEED, inner.n as usize);
        let (head_idx, head_guard, base_opt) = inner.resolve_chain_head(base_idx);
        let mut iter = ScanIterator::new(inner, head_idx, head_guard, base_opt);
        if iter.chain_size() == 0 {
            return Ok(None);
        }
        // §8: "After remove(k), get(k, MAX_EPOCH) returns NOT_FOUND" — a
        // tombstone is the current version as far as versioning is
        // concerned (§3), but not a value a reader should ever see.
        Ok(locate(&mut iter, key, epoch)?
            .map(|(_, header)| header)
            .filter(|header| !header.is_tombstone()))
    }

    /// §4.6: insert or update `key`. `cas` is `Some((old_file_id,
    /// old_offset))` to arm the compare-and-set precondition.
    pub fn put(&self, key: &[u8], record: Record, cas: Option<(u32, u64)>) -> KeydirResult<OpStatus> {
        loop {
            if let Some(status) = self.try_put_once(key, record, cas)? {
                return Ok(status);
            }
        }
    }

    fn try_put_once(
        &self,
        key: &[u8],
        record: Record,
        cas: Option<(u32, u64)>,
    ) -> KeydirResult<Option<OpStatus>> {
        let inner = &*self.inner;
        let epoch = inner.epoch.increment();
        let base_idx = hash::base_page(key, config::HASH_SEED, inner.n as usize);
        let (head_idx, head_guard, base_opt) = inner.resolve_chain_head(base_idx);
        let mut iter = ScanIterator::new(inner, head_idx, head_guard, base_opt);

        let found = if iter.chain_size() > 0 {
            locate(&mut iter, key, epoch)?
        } else {
            None
        };

        match found {
            Some((offset, header)) => {
                if let Some((old_fid, old_off)) = cas {
                    if header.file_id != old_fid || header.offset != old_off {
                        return Ok(Some(OpStatus::Modified));
                    }
                }
                match apply_update(
                    inner,
                    &mut iter,
                    offset,
                    header,
                    epoch,
                    record.file_id,
                    record.total_size,
                    record.offset,
                    record.timestamp,
                )? {
                    Some(()) => Ok(Some(OpStatus::Ok)),
                    None => Ok(None),
                }
            }
            None => {
                if cas.is_some() {
                    return Ok(Some(OpStatus::Modified));
                }
                match append_new_key(inner, &mut iter, key, epoch, record)? {
                    Some(()) => Ok(Some(OpStatus::Ok)),
                    None => Ok(None),
                }
            }
        }
    }

    /// §4.7: delete `key`. Same CAS convention as `put`.
    pub fn remove(&self, key: &[u8], cas: Option<(u32, u64)>) -> KeydirResult<OpStatus> {
        loop {
            if let Some(status) = self.try_remove_once(key, cas)? {
                return Ok(status);
            }
        }
    }

    fn try_remove_once(&self, key: &[u8], cas: Option<(u32, u64)>) -> KeydirResult<Option<OpStatus>> {
        let inner = &*self.inner;
        let epoch = inner.epoch.increment();
        let base_idx = hash::base_page(key, config::HASH_SEED, inner.n as usize);
        let (head_idx, head_guard, base_opt) = inner.resolve_chain_head(base_idx);
        let mut iter = ScanIterator::new(inner, head_idx, head_guard, base_opt);

        let found = if iter.chain_size() > 0 {
            locate(&mut iter, key, epoch)?
        } else {
            None
        };

        match found {
            Some((offset, header)) => {
                if let Some((old_fid, old_off)) = cas {
                    if header.file_id != old_fid || header.offset != old_off {
                        return Ok(Some(OpStatus::Modified));
                    }
                }
                match apply_update(
                    inner, &mut iter, offset, header, epoch, MAX_FILE_ID, 0, MAX_OFFSET, 0,
                )? {
                    Some(()) => Ok(Some(OpStatus::Ok)),
                    None => Ok(None),
                }
            }
            None => {
                if cas.is_some() {
                    Ok(Some(OpStatus::Modified))
                } else {
                    Ok(Some(OpStatus::Ok))
                }
            }
        }
    }

    /// §4.8: apply live/total deltas for `file_id`.
    #[allow(clippy::too_many_arguments)]
    pub fn update_fstats(
        &self,
        file_id: u32,
        tstamp: u32,
        expiration_epoch: u64,
        delta_live_keys: i64,
        delta_total_keys: i64,
        delta_live_bytes: i64,
        delta_total_bytes: i64,
        should_create: bool,
    ) {
        self.inner.fstats.lock().update(
            file_id,
            tstamp,
            expiration_epoch,
            delta_live_keys,
            delta_total_keys,
            delta_live_bytes,
            delta_total_bytes,
            should_create,
        );
    }

    pub fn fstats(&self, file_id: u32) -> Option<FileStats> {
        self.inner.fstats.lock().get(file_id)
    }

    pub fn basedir(&self) -> &Path {
        &self.inner.basedir
    }
}

impl Drop for KeydirInner {
    fn drop(&mut self) {
        self.swap.shutdown();
        info!(basedir = %self.basedir.display(), "keydir torn down");
    }
}

impl KeydirInner {
    pub(crate) fn lock_page(&self, idx: u32) -> PageGuard {
        if idx < self.n {
            self.memory.frame(idx).lock()
        } else {
            self.swap.lock(idx - self.n)
        }
    }

    pub(crate) fn try_lock_page(&self, idx: u32) -> Option<PageGuard> {
        if idx < self.n {
            self.memory.frame(idx).try_lock()
        } else {
            self.swap.try_lock(idx - self.n)
        }
    }

    pub(crate) fn allocate_page(&self) -> KeydirResult<(u32, PageGuard)> {
        if let Some((idx, mut guard)) = self.memory.try_alloc() {
            guard.is_borrowed = true;
            return Ok((idx, guard));
        }
        let (local, guard) = self.swap.try_alloc_or_grow()?;
        Ok((self.n + local, guard))
    }

    /// Lock `base_idx`, then follow `alt_idx` if set (§4.5 step 2). Returns
    /// `Some(base_idx)` in the third slot iff the base memory page is still
    /// itself the chain head (no spill has happened yet) — the only state
    /// in which `write_prep`'s is_free/borrow handling and the iterator's
    /// alt-page spill still apply.
    pub(crate) fn resolve_chain_head(&self, base_idx: u32) -> (u32, PageGuard, Option<u32>) {
        let base_guard = self.memory.frame(base_idx).lock();
        if base_guard.alt_idx != MAX_PAGE_IDX {
            let alt_idx = base_guard.alt_idx;
            drop(base_guard);
            let head_guard = self.lock_page(alt_idx);
            (alt_idx, head_guard, None)
        } else {
            (base_idx, base_guard, Some(base_idx))
        }
    }
}

/// Shared top-level-plus-version scan used by `get`, `put`, and `remove`
/// alike (§4.6 step 2: "run the scan above with this epoch"). For `get`,
/// `epoch` is the caller's requested snapshot bound; for `put`/`remove` it
/// is the just-incremented write epoch, which — being larger than any
/// existing version's epoch — makes this degenerate to "the current
/// version", exactly what a write needs to decide CAS/in-place-vs-append.
fn locate(
    iter: &mut ScanIterator,
    key: &[u8],
    epoch: u64,
) -> KeydirResult<Option<(u64, EntryHeader)>> {
    let mut offset = 0u64;
    let chain_size = iter.chain_size();
    while offset < chain_size {
        iter.ensure(offset + ENTRY_HEADER_SIZE, false)?;
        let header = EntryHeader::from_bytes(&iter.read_bytes(offset, ENTRY_HEADER_SIZE));
        let key_size = header.key_size;
        if key_size > 0 {
            iter.ensure(offset + ENTRY_HEADER_SIZE + key_size as u64, false)?;
            if iter.compare_key(offset + ENTRY_HEADER_SIZE, key) {
                return scan_to_epoch(iter, offset, header, epoch);
            }
        }
        offset += entry_size_for_key(key_size);
    }
    Ok(None)
}

/// Walk a matched key's version list (`next`, in decreasing-epoch order)
/// for the newest version whose epoch is `<= epoch`.
fn scan_to_epoch(
    iter: &mut ScanIterator,
    mut offset: u64,
    mut header: EntryHeader,
    epoch: u64,
) -> KeydirResult<Option<(u64, EntryHeader)>> {
    loop {
        if header.epoch <= epoch {
            return Ok(Some((offset, header)));
        }
        if header.next == 0 {
            return Ok(None);
        }
        offset = header.next as u64;
        iter.ensure(offset + ENTRY_HEADER_SIZE, false)?;
        header = EntryHeader::from_bytes(&iter.read_bytes(offset, ENTRY_HEADER_SIZE));
    }
}

/// Grow the chain to `target_size`, handling the one-time is_free/borrow
/// claim of a never-before-used base page (§4.6 "write_prep"). Returns
/// `Ok(None)` to signal the caller should restart the whole operation with
/// a fresh epoch (a reclaim race was lost).
fn write_prep(
    inner: &KeydirInner,
    iter: &mut ScanIterator,
    target_size: u64,
) -> KeydirResult<Option<()>> {
    if iter.chain_size() == 0 {
        if let Some(base_idx) = iter.base_idx_if_unspilled() {
            if inner.memory.frame(base_idx).load_is_free() {
                inner.memory.frame(base_idx).store_is_free(false);
            } else if iter.head_is_borrowed() {
                let (idx, guard) = iter.take_head();
                match allocator::reclaim_borrower(inner, idx, guard)? {
                    ReclaimOutcome::Restart => return Ok(None),
                    ReclaimOutcome::Done(guard) => iter.push_head(idx, guard),
                }
            }
        }
    }

    if target_size > u32::MAX as u64 {
        return Err(KeydirError::OutOfMemory(
            "chain size would exceed 4 GiB".into(),
        ));
    }
    iter.ensure(target_size, true)?;
    iter.set_chain_size(target_size);
    Ok(Some(()))
}

/// Append a brand-new key's record at the current chain tail (§4.6 step 4).
fn append_new_key(
    inner: &KeydirInner,
    iter: &mut ScanIterator,
    key: &[u8],
    epoch: u64,
    record: Record,
) -> KeydirResult<Option<()>> {
    let offset = iter.chain_size();
    let target_size = offset + entry_size_for_key(key.len() as u32);
    if write_prep(inner, iter, target_size)?.is_none() {
        return Ok(None);
    }
    let header = EntryHeader {
        file_id: record.file_id,
        total_size: record.total_size,
        epoch,
        offset: record.offset,
        timestamp: record.timestamp,
        next: 0,
        key_size: key.len() as u32,
    };
    iter.write_bytes(offset, &header.to_bytes());
    iter.write_bytes(offset + ENTRY_HEADER_SIZE, key);
    Ok(Some(()))
}

/// Apply an update to an already-located record: in place if no outstanding
/// snapshot can need the prior value, otherwise as a new appended version
/// (§4.6 step 3 / §4.7). Shared by `put` and `remove`, which differ only in
/// the fields they supply (`remove` passes the tombstone sentinels).
#[allow(clippy::too_many_arguments)]
fn apply_update(
    inner: &KeydirInner,
    iter: &mut ScanIterator,
    matched_offset: u64,
    matched_header: EntryHeader,
    epoch: u64,
    file_id: u32,
    total_size: u32,
    offset: u64,
    timestamp: u32,
) -> KeydirResult<Option<()>> {
    if inner.min_epoch.load() > matched_header.epoch {
        let new_header = EntryHeader {
            file_id,
            total_size,
            epoch,
            offset,
            timestamp,
            next: matched_header.next,
            key_size: matched_header.key_size,
        };
        iter.dead_bytes_add_at(matched_offset, entry_size_for_key(matched_header.key_size) as u32);
        iter.write_bytes(matched_offset, &new_header.to_bytes());
        return Ok(Some(()));
    }

    let new_offset = iter.chain_size();
    let target_size = new_offset + version_size();
    if target_size > u32::MAX as u64 {
        return Err(KeydirError::OutOfMemory(
            "chain size would exceed 4 GiB".into(),
        ));
    }
    if write_prep(inner, iter, target_size)?.is_none() {
        return Ok(None);
    }

    // The head is the only slot `locate`'s top-level scan can ever find (the
    // sole record with `key_size != 0`), so the newest version must land
    // there; the prior version is demoted to the newly-appended tail slot,
    // linked via `next` and stripped of its key bytes (§3: "Older versions
    // are appended after it... with key_size = 0").
    let demoted = EntryHeader {
        key_size: 0,
        ..matched_header
    };
    iter.write_bytes(new_offset, &demoted.to_bytes());
    let new_header = EntryHeader {
        file_id,
        total_size,
        epoch,
        offset,
        timestamp,
        next: new_offset as u32,
        key_size: matched_header.key_size,
    };
    iter.write_bytes(matched_offset, &new_header.to_bytes());
    Ok(Some(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_basedir(name: &str) -> PathBuf {
        crate::utils::test_dir(format!("keydir_{}", name))
    }

    fn record(file_id: u32, offset: u64, total_size: u32, timestamp: u32) -> Record {
        Record {
            file_id,
            total_size,
            offset,
            timestamp,
        }
    }

    #[test]
    fn basic_put_get() {
        let kd = Keydir::init(temp_basedir("basic"), 16, 2).unwrap();
        kd.put(b"hello", record(7, 100, 42, 1000), None).unwrap();
        let got = kd.get(b"hello", entry::MAX_EPOCH).unwrap().unwrap();
        assert_eq!(got.file_id, 7);
        assert_eq!(got.offset, 100);
        assert_eq!(got.total_size, 42);
        assert_eq!(got.timestamp, 1000);
    }

    #[test]
    fn overwrite_without_snapshot_stays_single_record() {
        let kd = Keydir::init(temp_basedir("overwrite"), 16, 2).unwrap();
        kd.put(b"hello", record(7, 100, 42, 1000), None).unwrap();
        kd.put(b"hello", record(7, 200, 42, 1001), None).unwrap();
        let got = kd.get(b"hello", entry::MAX_EPOCH).unwrap().unwrap();
        assert_eq!(got.offset, 200);
        assert_eq!(got.next, 0, "in-place update must not grow the chain");
    }

    #[test]
    fn snapshot_then_overwrite_links_two_versions() {
        let kd = Keydir::init(temp_basedir("snapshot"), 16, 2).unwrap();
        kd.put(b"k", record(1, 10, 8, 1), None).unwrap();
        kd.set_min_epoch(1);
        let e0 = kd.current_epoch();
        kd.put(b"k", record(1, 20, 8, 2), None).unwrap();

        let old = kd.get(b"k", e0).unwrap().unwrap();
        assert_eq!(old.offset, 10);
        let latest = kd.get(b"k", entry::MAX_EPOCH).unwrap().unwrap();
        assert_eq!(latest.offset, 20);
        assert_ne!(latest.next, 0, "a snapshot in flight must force a linked version");
    }

    #[test]
    fn cas_conflict_reports_modified() {
        let kd = Keydir::init(temp_basedir("cas"), 16, 2).unwrap();
        kd.put(b"k", record(1, 10, 8, 1), None).unwrap();
        kd.put(b"k", record(1, 20, 8, 2), None).unwrap();
        let status = kd.put(b"k", record(1, 30, 8, 3), Some((1, 10))).unwrap();
        assert_eq!(status, OpStatus::Modified);
        let got = kd.get(b"k", entry::MAX_EPOCH).unwrap().unwrap();
        assert_eq!(got.offset, 20);
    }

    #[test]
    fn tombstone_then_reput() {
        let kd = Keydir::init(temp_basedir("tombstone"), 16, 2).unwrap();
        kd.put(b"k", record(1, 10, 8, 1), None).unwrap();
        kd.remove(b"k", None).unwrap();
        assert!(kd.get(b"k", entry::MAX_EPOCH).unwrap().is_none());
        kd.put(b"k", record(2, 99, 8, 5), None).unwrap();
        let got = kd.get(b"k", entry::MAX_EPOCH).unwrap().unwrap();
        assert_eq!(got.file_id, 2);
        assert_eq!(got.offset, 99);
    }

    #[test]
    fn remove_missing_key_is_a_noop() {
        let kd = Keydir::init(temp_basedir("remove_missing"), 16, 2).unwrap();
        assert_eq!(kd.remove(b"ghost", None).unwrap(), OpStatus::Ok);
        assert_eq!(
            kd.remove(b"ghost", Some((1, 1))).unwrap(),
            OpStatus::Modified
        );
    }

    #[test]
    fn many_keys_share_a_small_pool() {
        // num_pages = 4 forces collisions, overflow growth, and (with
        // enough keys) the borrow/reclaim path (§8 scenario 6).
        let kd = Keydir::init(temp_basedir("collide"), 4, 4).unwrap();
        for i in 0..40u32 {
            let key = format!("key-{i}");
            kd.put(key.as_bytes(), record(i, i as u64 * 10, 16, i), None)
                .unwrap();
        }
        for i in 0..40u32 {
            let key = format!("key-{i}");
            let got = kd.get(key.as_bytes(), entry::MAX_EPOCH).unwrap().unwrap();
            assert_eq!(got.file_id, i);
            assert_eq!(got.offset, i as u64 * 10);
        }
    }

    #[test]
    fn fstats_respects_should_create() {
        let kd = Keydir::init(temp_basedir("fstats"), 4, 2).unwrap();
        kd.update_fstats(1, 100, 0, 1, 1, 10, 10, false);
        assert!(kd.fstats(1).is_none());
        kd.update_fstats(1, 100, 0, 1, 1, 10, 10, true);
        assert_eq!(kd.fstats(1).unwrap().live_keys, 1);
    }
}
