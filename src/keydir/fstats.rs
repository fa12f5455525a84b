//! Per-file live/total counters (§4.8), updated by callers (the external
//! merge/compaction process, in this crate's scope diagram) as records move
//! between live and dead states.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub live_keys: i64,
    pub total_keys: i64,
    pub live_bytes: i64,
    pub total_bytes: i64,
    pub oldest_tstamp: u32,
    pub newest_tstamp: u32,
    pub expiration_epoch: u64,
}

#[derive(Default)]
pub(crate) struct FstatsTable {
    inner: HashMap<u32, FileStats>,
}

impl FstatsTable {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    /// Apply the deltas described in §4.8. A nonexistent `file_id` is
    /// created on demand only when `should_create` is set; otherwise the
    /// update is silently dropped (the decrement-after-prune case the spec
    /// calls out).
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        file_id: u32,
        tstamp: u32,
        expiration_epoch: u64,
        delta_live_keys: i64,
        delta_total_keys: i64,
        delta_live_bytes: i64,
        delta_total_bytes: i64,
        should_create: bool,
    ) {
        let entry = if should_create {
            Some(self.inner.entry(file_id).or_insert_with(FileStats::default))
        } else {
            self.inner.get_mut(&file_id)
        };
        let Some(stats) = entry else {
            return;
        };
        stats.live_keys += delta_live_keys;
        stats.total_keys += delta_total_keys;
        stats.live_bytes += delta_live_bytes;
        stats.total_bytes += delta_total_bytes;
        stats.expiration_epoch = expiration_epoch;
        if stats.oldest_tstamp == 0 || tstamp < stats.oldest_tstamp {
            stats.oldest_tstamp = tstamp;
        }
        if tstamp > stats.newest_tstamp {
            stats.newest_tstamp = tstamp;
        }
    }

    pub fn get(&self, file_id: u32) -> Option<FileStats> {
        self.inner.get(&file_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_without_create_is_dropped() {
        let mut t = FstatsTable::new();
        t.update(1, 100, 0, 1, 1, 10, 10, false);
        assert!(t.get(1).is_none());
    }

    #[test]
    fn update_with_create_accumulates() {
        let mut t = FstatsTable::new();
        t.update(1, 100, 0, 1, 1, 10, 10, true);
        t.update(1, 50, 0, 1, 0, 5, 0, true);
        let s = t.get(1).unwrap();
        assert_eq!(s.live_keys, 2);
        assert_eq!(s.total_keys, 1);
        assert_eq!(s.live_bytes, 15);
        assert_eq!(s.oldest_tstamp, 50);
        assert_eq!(s.newest_tstamp, 100);
    }
}
