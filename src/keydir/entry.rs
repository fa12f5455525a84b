//! On-page entry header layout (§3): 36 bytes, little-endian, padded to an
//! 8-byte boundary, followed by the key on the first version of a chain.

pub const ENTRY_HEADER_SIZE: u64 = 36;

pub const MAX_OFFSET: u64 = u64::MAX;
pub const MAX_EPOCH: u64 = u64::MAX;
pub const MAX_FILE_ID: u32 = u32::MAX;

/// Round `size` up to the next multiple of 8.
pub fn padded(size: u64) -> u64 {
    (size + 7) & !7
}

/// Padded on-page size of a full entry (header + key) for a key of
/// `key_size` bytes.
pub fn entry_size_for_key(key_size: u32) -> u64 {
    padded(ENTRY_HEADER_SIZE + key_size as u64)
}

/// Padded on-page size of an appended version record, which never carries
/// key bytes (`key_size == 0`).
pub fn version_size() -> u64 {
    padded(ENTRY_HEADER_SIZE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub file_id: u32,
    pub total_size: u32,
    pub epoch: u64,
    pub offset: u64,
    pub timestamp: u32,
    /// Intra-chain byte offset of the next (older) version, or 0 if this is
    /// the oldest version reachable from the chain base.
    pub next: u32,
    /// Nonzero only on the first (newest) version of a key's chain.
    pub key_size: u32,
}

impl EntryHeader {
    pub fn is_tombstone(&self) -> bool {
        self.offset == MAX_OFFSET
    }

    pub fn to_bytes(self) -> [u8; ENTRY_HEADER_SIZE as usize] {
        let mut buf = [0u8; ENTRY_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&self.file_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.total_size.to_le_bytes());
        buf[8..16].copy_from_slice(&self.epoch.to_le_bytes());
        buf[16..24].copy_from_slice(&self.offset.to_le_bytes());
        buf[24..28].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[28..32].copy_from_slice(&self.next.to_le_bytes());
        buf[32..36].copy_from_slice(&self.key_size.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= ENTRY_HEADER_SIZE as usize);
        Self {
            file_id: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            total_size: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            epoch: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            offset: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            timestamp: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            next: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
            key_size: u32::from_le_bytes(buf[32..36].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let h = EntryHeader {
            file_id: 7,
            total_size: 42,
            epoch: 1000,
            offset: 100,
            timestamp: 1700000000,
            next: 0,
            key_size: 5,
        };
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), ENTRY_HEADER_SIZE as usize);
        assert_eq!(EntryHeader::from_bytes(&bytes), h);
    }

    #[test]
    fn padding_rounds_up_to_8() {
        assert_eq!(padded(36), 40);
        assert_eq!(padded(40), 40);
        assert_eq!(padded(41), 48);
        assert_eq!(entry_size_for_key(5), 48); // 36 + 5 = 41 -> 48
        assert_eq!(version_size(), 40);
    }

    #[test]
    fn tombstone_sentinel() {
        let mut h = EntryHeader {
            file_id: 1,
            total_size: 0,
            epoch: 1,
            offset: 0,
            timestamp: 0,
            next: 0,
            key_size: 0,
        };
        assert!(!h.is_tombstone());
        h.offset = MAX_OFFSET;
        assert!(h.is_tombstone());
    }
}
