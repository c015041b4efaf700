//! Low-level building blocks of the storage engine.
//!
//! Positioned file I/O, the block device, the pinning eviction cache and its
//! two specialisations (pages and branch locks), and the write-ahead log.

/// Fixed-size block file.
pub mod disk;

/// Pinning cache with hot, cold and free queues.
pub mod evict;

/// Page cache over the block device.
pub mod cache;

/// Per-branch reader/writer locks.
pub mod locks;

/// Positioned file I/O.
pub mod io;

/// Write-ahead logging for crash recovery.
pub mod wal;
