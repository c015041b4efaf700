//! Page cache over the block device.

#![forbid(unsafe_code)]

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{
    disk::Disk,
    evict::{EvictionCache, EvictionOptions, Pinned},
};
use crate::types::{PageId, Result, PAGE_SIZE};

/// In-memory copy of one block.
pub type Frame = RwLock<Box<[u8]>>;

fn blank_frame() -> Frame {
    RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice())
}

/// Pinned handle to a cached page.
///
/// The buffer lock only guards the bytes; callers coordinate structural
/// access through the lock table. Mutations stay in memory until
/// [`Page::sync`] writes them through to the device.
#[derive(Clone)]
pub struct Page {
    pin: Pinned<PageId, Frame>,
    disk: Arc<Disk>,
}

impl Page {
    /// Page number.
    pub fn id(&self) -> PageId {
        self.pin.key()
    }

    /// Shared view of the buffer.
    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.pin.read()
    }

    /// Exclusive view of the buffer.
    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.pin.write()
    }

    /// Writes the buffer back to the device.
    pub fn sync(&self) -> Result<()> {
        let buf = self.read();
        self.disk.write(self.id(), &buf)
    }
}

/// Pages keyed by page number, evicted through the shared eviction cache.
pub struct PageCache {
    disk: Arc<Disk>,
    frames: EvictionCache<PageId, Frame>,
}

impl PageCache {
    /// Wraps `disk` with a cache sized by `options`.
    pub fn new(disk: Arc<Disk>, options: EvictionOptions) -> Result<Self> {
        Ok(Self {
            disk,
            frames: EvictionCache::new("pages", options)?,
        })
    }

    /// Pins page `id`, reading it from the device on a miss.
    pub fn get(&self, id: PageId) -> Result<Page> {
        let pin = self.frames.acquire_with(id, || {
            let frame = blank_frame();
            self.disk.read(id, &mut frame.write())?;
            Ok(frame)
        })?;
        Ok(Page {
            pin,
            disk: Arc::clone(&self.disk),
        })
    }

    /// Allocates a fresh zeroed page and pins it.
    pub fn allocate(&self) -> Result<Page> {
        let id = self.disk.allocate()?;
        let pin = self.frames.insert(id, blank_frame())?;
        Ok(Page {
            pin,
            disk: Arc::clone(&self.disk),
        })
    }

    /// Keeps future allocations above `count - 1`.
    pub fn reserve(&self, count: u64) {
        self.disk.reserve(count);
    }

    /// Number of allocated pages on the device.
    pub fn blocks(&self) -> u64 {
        self.disk.blocks()
    }

    /// Number of pages currently cached.
    pub fn resident(&self) -> usize {
        self.frames.len()
    }

    /// Runs an eviction pass; returns the number of pages dropped.
    pub fn collect(&self) -> usize {
        self.frames.collect()
    }

    /// Durably syncs the device.
    pub fn flush(&self) -> Result<()> {
        self.disk.flush()
    }

    /// Stops the eviction worker.
    pub fn shutdown(&self) {
        self.frames.shutdown();
    }
}
