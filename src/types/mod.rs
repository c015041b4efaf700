//! Identifiers, limits and error types shared by every layer of the engine.

/// CRC32C used to frame log records.
pub mod checksum;
/// Error taxonomy and the crate-wide `Result` alias.
pub mod error;
/// Page layout, dispatch slot tags and structural change records.
pub mod page;

pub use checksum::{Checksum, Crc32c};
pub use error::{RadixError, Result};
pub use page::{Branch, PageId, TreeChange, PAGE_SIZE};

/// Commit and read timestamps granted by the scheduler.
pub type Timestamp = u64;

/// Longest logical key accepted at the API boundary.
pub const MAX_KEY_SIZE: usize = 4074;
/// Longest value accepted at the API boundary (bounded by the blob length prefix).
pub const MAX_VALUE_SIZE: usize = u16::MAX as usize;
/// Upper bound on the framed size of a transaction's write-set record.
pub const MAX_TRANSACTION_SIZE: usize = 64 << 20;

/// Value words with a reserved meaning inside the index.
///
/// Anything at or above [`value::FIRST_OFFSET`] is a blob store offset.
pub mod value {
    /// No mapping. Rolled-back versions are rewritten to this word.
    pub const CANCEL: u64 = 0;
    /// The logical key was deleted at this version.
    pub const TOMBSTONE: u64 = 1;
    /// The key maps to a zero-length value.
    pub const EMPTY: u64 = 2;
    /// Smallest word that names a blob offset.
    pub const FIRST_OFFSET: u64 = 8;
}

/// Rejects keys the index cannot store.
pub fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() {
        return Err(RadixError::KeyIsEmpty);
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(RadixError::KeyTooLong);
    }
    Ok(())
}

/// Rejects values the blob store cannot frame.
pub fn check_value(value: &[u8]) -> Result<()> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(RadixError::ValTooLong);
    }
    Ok(())
}
