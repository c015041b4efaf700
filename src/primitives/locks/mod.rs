//! Per-branch reader/writer locks for the trie.
//!
//! A branch is a `(page, byte)` pair packed as `page | byte << 56`. Lock
//! objects live in an eviction cache so idle ones are dropped; a guard keeps
//! its lock object pinned until the lock is released.

#![forbid(unsafe_code)]

use std::sync::Arc;

use parking_lot::{
    lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard},
    RawRwLock, RwLock,
};

use super::evict::{EvictionCache, EvictionOptions, Pinned};
use crate::types::{PageId, Result};

type BranchLock = Arc<RwLock<()>>;

/// Packs a branch into its lock-table key.
pub fn branch_key(page: PageId, byte: u8) -> u64 {
    (page.0 & PageId::MAX) | (u64::from(byte) << 56)
}

enum Held {
    Shared(#[allow(dead_code)] ArcRwLockReadGuard<RawRwLock, ()>),
    Exclusive(#[allow(dead_code)] ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// A held branch lock. Unlocks, then unpins, on drop.
pub struct BranchGuard {
    // Field order matters: the lock is released before the pin.
    held: Held,
    pin: Pinned<u64, BranchLock>,
}

impl BranchGuard {
    /// Lock-table key of the branch.
    pub fn key(&self) -> u64 {
        self.pin.key()
    }

    /// Whether this guard excludes other holders.
    pub fn is_exclusive(&self) -> bool {
        matches!(self.held, Held::Exclusive(_))
    }
}

/// Lock objects keyed by branch.
pub struct LockTable {
    locks: EvictionCache<u64, BranchLock>,
}

impl LockTable {
    /// Creates the table and its eviction worker.
    pub fn new(options: EvictionOptions) -> Result<Self> {
        Ok(Self {
            locks: EvictionCache::new("locks", options)?,
        })
    }

    fn pin(&self, page: PageId, byte: u8) -> Result<Pinned<u64, BranchLock>> {
        self.locks
            .acquire_with(branch_key(page, byte), || Ok(Arc::new(RwLock::new(()))))
    }

    /// Takes the branch lock shared. Re-entrant for a thread that already
    /// holds it shared, even with a writer queued.
    pub fn read(&self, page: PageId, byte: u8) -> Result<BranchGuard> {
        let pin = self.pin(page, byte)?;
        let lock: &BranchLock = &pin;
        let held = Held::Shared(lock.read_arc_recursive());
        Ok(BranchGuard { held, pin })
    }

    /// Takes the branch lock exclusively.
    pub fn write(&self, page: PageId, byte: u8) -> Result<BranchGuard> {
        let pin = self.pin(page, byte)?;
        let lock: &BranchLock = &pin;
        let held = Held::Exclusive(lock.write_arc());
        Ok(BranchGuard { held, pin })
    }

    /// Number of lock objects resident.
    pub fn resident(&self) -> usize {
        self.locks.len()
    }

    /// Runs an eviction pass over idle lock objects.
    pub fn collect(&self) -> usize {
        self.locks.collect()
    }

    /// Stops the eviction worker.
    pub fn shutdown(&self) {
        self.locks.shutdown();
    }
}
