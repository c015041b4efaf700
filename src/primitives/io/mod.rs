#![forbid(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
    sync::Arc,
};

use crate::types::{RadixError, Result};

#[cfg(test)]
macro_rules! io_trace {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

#[cfg(not(test))]
macro_rules! io_trace {
    ($($arg:tt)*) => {
        if false {
            let _ = format_args!($($arg)*);
        }
    };
}

/// Positioned file access shared by the block device and the blob store.
pub trait FileIo: Send + Sync + 'static {
    /// Fills `dst` from `off`; a short read is [`RadixError::ReadFailed`].
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes data and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Current file length in bytes.
    fn len(&self) -> Result<u64>;
    /// Whether the file holds no bytes.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file.
    fn set_len(&self, len: u64) -> Result<()>;
}

#[cfg(unix)]
fn pread(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    while !dst.is_empty() {
        let read = file.read_at(dst, off)?;
        if read == 0 {
            io_trace!("[io.pread] eof off={} remaining={}", off, dst.len());
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "pread hit eof"));
        }
        dst = &mut dst[read..];
        off += read as u64;
    }
    Ok(())
}

#[cfg(unix)]
fn pwrite(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    while !src.is_empty() {
        let written = file.write_at(src, off)?;
        if written == 0 {
            io_trace!("[io.pwrite] stalled off={} remaining={}", off, src.len());
            return Err(io::Error::new(io::ErrorKind::WriteZero, "pwrite made no progress"));
        }
        src = &src[written..];
        off += written as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn pread(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !dst.is_empty() {
        let read = file.seek_read(dst, off)?;
        if read == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "seek_read hit eof"));
        }
        dst = &mut dst[read..];
        off += read as u64;
    }
    Ok(())
}

#[cfg(windows)]
fn pwrite(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !src.is_empty() {
        let written = file.seek_write(src, off)?;
        if written == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "seek_write made no progress"));
        }
        src = &src[written..];
        off += written as u64;
    }
    Ok(())
}

/// [`FileIo`] over a shared `std::fs::File`.
#[derive(Clone, Debug)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an open file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens `path` read-write, creating it when missing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self::new(file))
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        pread(&self.inner, off, dst).map_err(RadixError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        pwrite(&self.inner, off, src).map_err(RadixError::from)
    }

    fn sync_all(&self) -> Result<()> {
        io_trace!("[io.sync_all] start");
        self.inner.sync_all().map_err(RadixError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.metadata()?.len())
    }

    fn set_len(&self, len: u64) -> Result<()> {
        self.inner.set_len(len).map_err(RadixError::from)
    }
}
