//! Embedded transactional key-value engine.
//!
//! Keys are indexed by a 256-ary radix trie laid out over 4 KiB pages,
//! versioned for snapshot isolation and made durable through a
//! memory-mapped write-ahead log with periodic checkpoints.

#![warn(missing_docs)]

/// Engine handle, configuration, commit scheduler and transactions.
pub mod db;
/// Block device, caches, lock table and write-ahead log.
pub mod primitives;
/// Radix trie, multi-version layer, value store and recovery.
pub mod storage;
/// Shared identifiers, limits and errors.
pub mod types;

pub use db::{Config, Db, Stats, Transaction, TxnIter};
pub use types::{RadixError, Result, Timestamp};
