//! Scan iterator (§4.4): walks a page chain that may straddle page
//! boundaries, lazily locking pages as the scan needs them, and releasing
//! everything it holds together when dropped.

use crate::common::{KeydirError, KeydirResult};
use crate::config::PAGE_SIZE_BYTES;
use crate::keydir::page::{PageGuard, MAX_PAGE_IDX};
use crate::keydir::KeydirInner;

pub(crate) struct ScanIterator<'a> {
    dir: &'a KeydirInner,
    /// Locked pages composing the chain so far, in chain order. `pages[0]`
    /// is the chain head (a base memory page, or the alt swap page it
    /// delegated to).
    pages: Vec<(u32, PageGuard)>,
    /// `Some(base_idx)` exactly as long as `pages[0]` is still the
    /// unspilled base memory page for this chain — i.e. the alt-page spill
    /// in `ensure` is still eligible to fire. Cleared the moment the chain
    /// grows past one page or a spill has already happened.
    base_idx: Option<u32>,
}

impl<'a> ScanIterator<'a> {
    /// `head_idx`/`head_guard` must already be resolved past any existing
    /// alt-page indirection (see `KeydirInner::resolve_chain_head`).
    /// `base_idx` should be `Some` only when `head_idx` is itself still the
    /// literal, unspilled base page.
    pub fn new(
        dir: &'a KeydirInner,
        head_idx: u32,
        head_guard: PageGuard,
        base_idx: Option<u32>,
    ) -> Self {
        Self {
            dir,
            pages: vec![(head_idx, head_guard)],
            base_idx,
        }
    }

    pub fn chain_size(&self) -> u64 {
        self.pages[0].1.size as u64
    }

    pub fn set_chain_size(&mut self, size: u64) {
        self.pages[0].1.size = size as u32;
    }

    /// Credit `bytes` of newly-dead space to whichever page physically holds
    /// `offset` (not necessarily the chain head — a record being overwritten
    /// in place may live several pages into a long chain).
    pub fn dead_bytes_add_at(&mut self, offset: u64, bytes: u32) {
        let (page_idx, _) = Self::locate(offset);
        self.pages[page_idx].1.dead_bytes += bytes;
    }

    /// `Some(base_idx)` iff `pages[0]` is still the literal, unspilled base
    /// memory page — the only state in which `write_prep`'s one-time
    /// is_free/borrow handling applies.
    pub fn base_idx_if_unspilled(&self) -> Option<u32> {
        self.base_idx
    }

    pub fn head_is_borrowed(&self) -> bool {
        self.pages[0].1.size == 0 && self.pages[0].1.is_borrowed
    }

    /// Take ownership of the head page's guard, e.g. to hand it to the
    /// reclaim protocol. Only valid while the chain is still a single page
    /// (guaranteed whenever `base_idx_if_unspilled` is `Some` and
    /// `chain_size() == 0`).
    pub fn take_head(&mut self) -> (u32, PageGuard) {
        debug_assert_eq!(self.pages.len(), 1);
        self.pages.pop().expect("iterator always has a head page")
    }

    pub fn push_head(&mut self, idx: u32, guard: PageGuard) {
        debug_assert!(self.pages.is_empty());
        self.pages.push((idx, guard));
    }

    /// Make sure every page covering `[0, end_byte)` is locked and present.
    /// With `grow = false` this only follows existing `next` links and
    /// fails if the chain isn't already that long. With `grow = true` it
    /// allocates and links new pages as needed, including (on the very
    /// first extension past an unspilled base page) the alt-page spill
    /// described in §1/§9 when the memory pool looks under pressure.
    pub fn ensure(&mut self, end_byte: u64, grow: bool) -> KeydirResult<()> {
        let page_size = PAGE_SIZE_BYTES as u64;
        while (self.pages.len() as u64) * page_size < end_byte {
            let last = self.pages.len() - 1;
            let next = self.pages[last].1.next;
            if next != MAX_PAGE_IDX {
                let guard = self.dir.lock_page(next);
                self.pages.push((next, guard));
                self.base_idx = None;
                continue;
            }

            if !grow {
                return Err(KeydirError::InvalidInput(
                    "offset beyond committed chain size".into(),
                ));
            }

            if last == 0 {
                if self.base_idx.is_some() {
                    if self.dir.memory.is_likely_empty() {
                        // The swap page becomes the new logical page 0: every
                        // future `resolve_chain_head` follows `alt_idx` straight
                        // to it and never looks at the base page's own
                        // data/size again, so the base guard must come out of
                        // the addressable `pages` vector rather than sit
                        // alongside the swap page at index 1 — leaving it in
                        // place would make this operation's own subsequent
                        // `read_bytes`/`write_bytes`/`set_chain_size` calls
                        // land on a page no read path will ever consult again.
                        let (swap_local, mut swap_guard) = self.dir.swap.try_alloc_or_grow()?;
                        let swap_global = self.dir.n + swap_local;
                        let (_, mut base_guard) =
                            self.pages.pop().expect("chain always has a head page");
                        swap_guard
                            .data
                            .as_mut_slice()
                            .copy_from_slice(base_guard.data.as_slice());
                        swap_guard.prev = MAX_PAGE_IDX;
                        swap_guard.next = MAX_PAGE_IDX;
                        swap_guard.size = base_guard.size;
                        swap_guard.dead_bytes = base_guard.dead_bytes;

                        base_guard.alt_idx = swap_global;
                        base_guard.size = 0;
                        base_guard.next = MAX_PAGE_IDX;
                        base_guard.dead_bytes = 0;
                        drop(base_guard);

                        self.pages.push((swap_global, swap_guard));
                        self.base_idx = None;
                        continue;
                    }
                }
            }

            let (new_idx, mut new_guard) = self.dir.allocate_page()?;
            new_guard.prev = self.pages[last].0;
            new_guard.next = MAX_PAGE_IDX;
            self.pages[last].1.next = new_idx;
            self.pages.push((new_idx, new_guard));
            self.base_idx = None;
        }
        Ok(())
    }

    fn locate(offset: u64) -> (usize, usize) {
        let page_size = PAGE_SIZE_BYTES as u64;
        ((offset / page_size) as usize, (offset % page_size) as usize)
    }

    pub fn read_bytes(&self, offset: u64, len: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(len as usize);
        let mut remaining = len;
        let mut cursor = offset;
        while remaining > 0 {
            let (page_idx, page_off) = Self::locate(cursor);
            let page = &self.pages[page_idx].1;
            let avail = PAGE_SIZE_BYTES - page_off;
            let take = avail.min(remaining as usize);
            out.extend_from_slice(&page.data.as_slice()[page_off..page_off + take]);
            cursor += take as u64;
            remaining -= take as u64;
        }
        out
    }

    pub fn write_bytes(&mut self, offset: u64, bytes: &[u8]) {
        let mut remaining = bytes.len();
        let mut written = 0usize;
        let mut cursor = offset;
        while remaining > 0 {
            let (page_idx, page_off) = Self::locate(cursor);
            let page = &mut self.pages[page_idx].1;
            let avail = PAGE_SIZE_BYTES - page_off;
            let take = avail.min(remaining);
            page.data.as_mut_slice()[page_off..page_off + take]
                .copy_from_slice(&bytes[written..written + take]);
            cursor += take as u64;
            written += take;
            remaining -= take;
        }
    }

    /// Byte-for-byte comparison of `key` against the chain at `offset`,
    /// without materializing an intermediate `Vec` (§4.4 "compares in 4 KiB
    /// chunks, because the key may straddle boundaries").
    pub fn compare_key(&self, offset: u64, key: &[u8]) -> bool {
        let mut remaining = key.len();
        let mut checked = 0usize;
        let mut cursor = offset;
        while remaining > 0 {
            let (page_idx, page_off) = Self::locate(cursor);
            let page = &self.pages[page_idx].1;
            let avail = PAGE_SIZE_BYTES - page_off;
            let take = avail.min(remaining);
            if page.data.as_slice()[page_off..page_off + take] != key[checked..checked + take] {
                return false;
            }
            cursor += take as u64;
            checked += take;
            remaining -= take;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::keydir::{entry, Keydir, Record};

    fn temp_basedir(name: &str) -> std::path::PathBuf {
        crate::utils::test_dir(format!("iterator_{}", name))
    }

    #[test]
    fn ensure_grows_and_links_pages() {
        let dir = temp_basedir("grow");
        let kd = Keydir::init(&dir, 4, 2).unwrap();
        // A page chain many times the size of one page forces `ensure` to
        // allocate and link several pages; exercised indirectly through a
        // large key to keep this test grounded in the public API rather
        // than reaching into iterator internals.
        let key = vec![b'k'; 9000];
        kd.put(
            &key,
            Record {
                file_id: 1,
                total_size: 10,
                offset: 5,
                timestamp: 1,
            },
            None,
        )
        .unwrap();
        let hdr = kd.get(&key, entry::MAX_EPOCH).unwrap().unwrap();
        assert_eq!(hdr.offset, 5);
    }
}
