use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RadixError>;

/// Errors surfaced by the storage engine.
#[derive(Debug, Error)]
pub enum RadixError {
    /// Underlying file operation failed.
    #[error("I/O error: {0}")]
    Io(io::Error),
    /// Key has no visible mapping.
    #[error("key does not exist")]
    NotExist,
    /// Device, blob store or log capacity exhausted.
    #[error("out of space")]
    OutOfSpace,
    /// A positioned read returned fewer bytes than requested.
    #[error("short read")]
    ReadFailed,
    /// A positioned write made no progress.
    #[error("short write")]
    WriteFailed,
    /// Keys must contain at least one byte.
    #[error("key is empty")]
    KeyIsEmpty,
    /// Key exceeds the maximum key size.
    #[error("key too long")]
    KeyTooLong,
    /// Value exceeds the maximum value size.
    #[error("value too long")]
    ValTooLong,
    /// A key in the read-set was overwritten by a later commit.
    #[error("transaction conflict")]
    TransactionConflict,
    /// Mutation attempted through a read-only transaction.
    #[error("read-only transaction")]
    ReadOnlyTransaction,
    /// Internal invariant violated; on-disk state is likely corrupt.
    #[error("unknown error: {0}")]
    UnknownError(&'static str),
    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<io::Error> for RadixError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => RadixError::ReadFailed,
            io::ErrorKind::WriteZero => RadixError::WriteFailed,
            _ => RadixError::Io(err),
        }
    }
}
