#![forbid(unsafe_code)]

use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tracing::info;

use super::io::{FileIo, StdFileIo};
use crate::types::{
    page::{DIRECT_OFFSET, FANOUT, PREALLOCATED_PAGES},
    Branch, PageId, RadixError, Result, PAGE_SIZE,
};

/// Fixed-size block file backing the index.
///
/// Block numbers are handed out by a monotonic counter; nothing is ever
/// returned to a free list.
pub struct Disk {
    io: Arc<dyn FileIo>,
    blocks: AtomicU64,
}

impl Disk {
    /// Opens (or creates) the block file at `path`.
    ///
    /// Files shorter than the preallocated prefix layout are formatted: the
    /// root page fans out to 256 prefix pages whose slots are all empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(path.as_ref())?);
        let blocks = io.len()? / PAGE_SIZE as u64;
        let disk = Self {
            io,
            blocks: AtomicU64::new(blocks),
        };
        if blocks < PREALLOCATED_PAGES {
            disk.format()?;
            info!(path = %path.as_ref().display(), "disk.format");
        }
        Ok(disk)
    }

    fn format(&self) -> Result<()> {
        self.io.set_len(0)?;
        self.blocks.store(0, Ordering::SeqCst);

        let mut page = vec![0u8; PAGE_SIZE];
        let root = self.allocate()?;
        for b in 0..FANOUT {
            let child = Branch::Prefix(PageId(b as u64 + 1)).encode();
            page[b * 8..b * 8 + 8].copy_from_slice(&child.to_le_bytes());
        }
        self.write(root, &page)?;

        let empty = Branch::Empty.encode().to_le_bytes();
        page.fill(0);
        for slot in page[..DIRECT_OFFSET].chunks_exact_mut(8) {
            slot.copy_from_slice(&empty);
        }
        for _ in 0..FANOUT {
            let id = self.allocate()?;
            self.write(id, &page)?;
        }
        self.flush()
    }

    /// Fills `dst` with block `id`. Blocks allocated but never written read
    /// as zeros.
    pub fn read(&self, id: PageId, dst: &mut [u8]) -> Result<()> {
        if id.0 >= self.blocks() {
            return Err(RadixError::OutOfSpace);
        }
        match self.io.read_at(id.0 * PAGE_SIZE as u64, dst) {
            Err(RadixError::ReadFailed) => {
                dst.fill(0);
                Ok(())
            }
            other => other,
        }
    }

    /// Writes block `id`.
    pub fn write(&self, id: PageId, src: &[u8]) -> Result<()> {
        if id.0 >= self.blocks() {
            return Err(RadixError::OutOfSpace);
        }
        self.io.write_at(id.0 * PAGE_SIZE as u64, src)
    }

    /// Claims the next block number.
    pub fn allocate(&self) -> Result<PageId> {
        self.blocks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n <= PageId::MAX).then_some(n + 1)
            })
            .map(PageId)
            .map_err(|_| RadixError::OutOfSpace)
    }

    /// Ensures the allocation counter is past `count - 1`.
    pub fn reserve(&self, count: u64) {
        self.blocks.fetch_max(count, Ordering::SeqCst);
    }

    /// Number of allocated blocks.
    pub fn blocks(&self) -> u64 {
        self.blocks.load(Ordering::SeqCst)
    }

    /// Durably syncs the block file.
    pub fn flush(&self) -> Result<()> {
        self.io.sync_all()
    }
}
