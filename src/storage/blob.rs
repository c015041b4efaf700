//! Append-only store for value payloads.
//!
//! Values live in files `0.DAT`, `1.DAT`, ... as `[len: u16 LE][bytes]`
//! records. Offsets are store-wide: a file's first byte sits at the sum of
//! the sizes of the files before it. The first file opens with an 8-byte
//! magic so no record starts below [`value::FIRST_OFFSET`].

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::{
    primitives::io::{FileIo, StdFileIo},
    types::{check_value, value, RadixError, Result},
};

/// Magic header of the first data file.
pub const MAGIC: &[u8; 8] = b"RADIXDB\x01";

/// Largest size of one data file.
pub const MAX_FILE_SIZE: u64 = 1 << 40;

const HEADER_LEN: u64 = 2;

struct BlobFile {
    io: Arc<dyn FileIo>,
    /// Store-wide offset of the file's first byte.
    base: u64,
    /// Bytes allocated in the file, which may run ahead of its length.
    size: u64,
}

/// Multi-file value store.
pub struct BlobStore {
    dir: PathBuf,
    file_cap: u64,
    files: RwLock<Vec<BlobFile>>,
}

fn file_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{index}.DAT"))
}

impl BlobStore {
    /// Opens the store in `dir`, creating the first file if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_file_cap(dir, MAX_FILE_SIZE)
    }

    /// Opens the store with a custom per-file cap.
    pub fn with_file_cap(dir: impl AsRef<Path>, file_cap: u64) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut files = Vec::new();
        let mut base = 0;
        while file_path(&dir, files.len()).exists() {
            let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(file_path(&dir, files.len()))?);
            let size = io.len()?;
            files.push(BlobFile { io, base, size });
            base += size;
        }
        if files.is_empty() {
            let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(file_path(&dir, 0))?);
            io.write_at(0, MAGIC)?;
            io.sync_all()?;
            files.push(BlobFile {
                io,
                base: 0,
                size: MAGIC.len() as u64,
            });
        } else if files[0].size < value::FIRST_OFFSET {
            return Err(RadixError::UnknownError("data file shorter than its magic"));
        }
        info!(dir = %dir.display(), files = files.len(), bytes = base, "blob.open");
        Ok(Self {
            dir,
            file_cap,
            files: RwLock::new(files),
        })
    }

    /// Reserves room for a value of `len` bytes and returns its offset.
    pub fn alloc(&self, len: usize) -> Result<u64> {
        let need = HEADER_LEN + len as u64;
        if need > self.file_cap {
            return Err(RadixError::OutOfSpace);
        }
        let mut files = self.files.write();
        let last = files.len() - 1;
        if files[last].size + need > self.file_cap {
            let (base, size) = (files[last].base, files[last].size);
            files[last].io.set_len(size)?;
            let index = files.len();
            let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open(file_path(&self.dir, index))?);
            files.push(BlobFile {
                io,
                base: base + size,
                size: 0,
            });
            debug!(file = index, base = base + size, "blob.roll");
        }
        let file = files.len() - 1;
        let at = files[file].base + files[file].size;
        files[file].size += need;
        Ok(at)
    }

    fn locate(files: &[BlobFile], offset: u64) -> usize {
        files
            .iter()
            .rposition(|f| f.base <= offset)
            .unwrap_or(0)
    }

    /// Writes `bytes` at an offset returned by [`BlobStore::alloc`].
    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        check_value(bytes)?;
        let mut record = Vec::with_capacity(HEADER_LEN as usize + bytes.len());
        record.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        record.extend_from_slice(bytes);
        let end = {
            let files = self.files.read();
            let file = &files[Self::locate(&files, offset)];
            let local = offset - file.base;
            file.io.write_at(local, &record)?;
            local + record.len() as u64
        };
        let mut files = self.files.write();
        let index = Self::locate(&files, offset);
        let file = &mut files[index];
        file.size = file.size.max(end);
        Ok(())
    }

    /// Reads the value stored at `offset`.
    pub fn read(&self, offset: u64) -> Result<Vec<u8>> {
        let files = self.files.read();
        let file = &files[Self::locate(&files, offset)];
        let local = offset - file.base;
        if local + HEADER_LEN > file.size {
            return Err(RadixError::NotExist);
        }
        let mut header = [0u8; HEADER_LEN as usize];
        file.io.read_at(local, &mut header)?;
        let mut bytes = vec![0u8; u16::from_le_bytes(header) as usize];
        file.io.read_at(local + HEADER_LEN, &mut bytes)?;
        Ok(bytes)
    }

    /// Releases a value. Space is never reclaimed.
    pub fn del(&self, _offset: u64) -> Result<()> {
        Ok(())
    }

    /// Durably syncs every data file.
    pub fn flush(&self) -> Result<()> {
        for file in self.files.read().iter() {
            file.io.sync_all()?;
        }
        Ok(())
    }

    /// Total allocated bytes across all files.
    pub fn size(&self) -> u64 {
        let files = self.files.read();
        files.last().map_or(0, |f| f.base + f.size)
    }

    /// Number of data files.
    pub fn files(&self) -> usize {
        self.files.read().len()
    }
}
