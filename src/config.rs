//! Tunables for the keydir. Caution: `PAGE_SIZE_BYTES` is load-bearing for
//! the on-page layout computed in `keydir::entry` — changing it without
//! re-deriving the layout math will corrupt chain walks.

/// Fixed size of every memory page and every swap page, in bytes.
pub const PAGE_SIZE_BYTES: usize = 4 * 1024;

/// Default number of resident memory pages when a size isn't given explicitly.
pub const DEFAULT_NUM_PAGES: usize = 1024;

/// Default number of swap pages the backing file is truncated to at init.
pub const DEFAULT_INITIAL_SWAP_PAGES: usize = 16;

/// Stride used when threading the initial memory free-list (see `keydir::pool`).
/// Spreads consecutively-hashed keys' base pages across the backing buffer so
/// concurrent borrowers don't collide on the same cache lines.
pub const FREE_LIST_STRIDE: usize = 16;

/// File name of the mmap-backed swap file, created under the keydir's `basedir`.
pub const SWAP_FILE_NAME: &str = "bitcask.swap";

/// Seed used for the MurmurHash3 base-page selection in `keydir::hash`.
pub const HASH_SEED: u32 = 42;

pub const LOG_LEVEL: &str = "info";
pub const LOG_PATH: &str = "./logs/keydir.log";
