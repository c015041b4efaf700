//! Write-ahead log over rotating memory-mapped files.
//!
//! Files are named `N.LOG` and preallocated to a fixed capacity. Appends are
//! serialised under one mutex and msynced before they return. A checkpoint
//! bracket lets everything before the file holding the bracket's start be
//! deleted.

/// Record payloads and frame codec.
pub mod record;
mod segment;

use std::{
    fs,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

pub use record::{FrameScan, Record, ScanStop, WriteEntry, FRAME_HEADER_LEN};
use segment::{list_segments, segment_path, Segment};

use crate::types::{RadixError, Result, Timestamp};

/// Default capacity of one log file.
pub const DEFAULT_FILE_SIZE: usize = 64 << 20;

struct WalState {
    segment: Segment,
    offset: usize,
    checkpoint_from: Option<u64>,
}

/// Log writer.
pub struct Wal {
    dir: PathBuf,
    file_size: usize,
    state: Mutex<WalState>,
}

/// Every valid record found in a log directory.
#[derive(Debug, Default)]
pub struct LogContents {
    /// Records in log order.
    pub records: Vec<Record>,
    /// Whether scanning stopped at a damaged frame rather than clean padding.
    pub torn: bool,
}

impl Wal {
    /// Opens the log in `dir`, positioning the writer after the last valid
    /// record of the newest file.
    pub fn open(dir: impl AsRef<Path>, file_size: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let newest = list_segments(&dir)?.last().copied().unwrap_or(0);
        let segment = Segment::open(&dir, newest, file_size)?;
        let offset = record::scan_frames(segment.bytes()).end;
        debug!(segment = newest, offset, "wal.open");
        Ok(Self {
            dir,
            file_size,
            state: Mutex::new(WalState {
                segment,
                offset,
                checkpoint_from: None,
            }),
        })
    }

    /// Capacity of each log file.
    pub fn file_size(&self) -> usize {
        self.file_size
    }

    /// Appends `record` and waits until it is durable.
    pub fn append(&self, record: &Record) -> Result<()> {
        let frame = record.frame();
        if frame.len() > self.file_size {
            return Err(RadixError::OutOfSpace);
        }
        let mut state = self.state.lock();
        if state.offset + frame.len() > state.segment.capacity() {
            self.rotate(&mut state)?;
        }
        let offset = state.offset;
        state.segment.write(offset, &frame)?;
        state.offset += frame.len();
        Ok(())
    }

    fn rotate(&self, state: &mut WalState) -> Result<()> {
        let next = state.segment.index() + 1;
        state.segment = Segment::open(&self.dir, next, self.file_size)?;
        state.offset = 0;
        debug!(segment = next, "wal.rotate");
        Ok(())
    }

    /// Remembers the current file as the start of a checkpoint.
    pub fn mark_checkpoint(&self) {
        let mut state = self.state.lock();
        state.checkpoint_from = Some(state.segment.index());
    }

    /// Deletes every file older than the one marked by the last
    /// [`Wal::mark_checkpoint`]. Returns how many were removed.
    pub fn truncate_checkpointed(&self) -> Result<usize> {
        let from = self.state.lock().checkpoint_from.take();
        match from {
            Some(from) => self.remove_before(from),
            None => Ok(0),
        }
    }

    /// Starts a fresh file holding only a completed checkpoint bracket at
    /// `ts`, then deletes every older file.
    pub fn reset(&self, ts: Timestamp) -> Result<()> {
        let current = {
            let mut state = self.state.lock();
            self.rotate(&mut state)?;
            state.checkpoint_from = None;
            state.segment.index()
        };
        self.append(&Record::StartCheckpoint {
            ts,
            open: Vec::new(),
        })?;
        self.append(&Record::EndCheckpoint)?;
        let removed = self.remove_before(current)?;
        info!(ts, segment = current, removed, "wal.reset");
        Ok(())
    }

    fn remove_before(&self, index: u64) -> Result<usize> {
        let mut removed = 0;
        for old in list_segments(&self.dir)?.into_iter().filter(|&i| i < index) {
            fs::remove_file(segment_path(&self.dir, old))?;
            removed += 1;
        }
        if removed > 0 {
            debug!(before = index, removed, "wal.truncate");
        }
        Ok(removed)
    }

    /// Indices of the log files currently on disk.
    pub fn segments(&self) -> Result<Vec<u64>> {
        list_segments(&self.dir)
    }

    /// Reads every valid record under `dir`, oldest file first.
    ///
    /// Zero padding ends a file; a damaged frame ends the whole log.
    pub fn read_all(dir: impl AsRef<Path>) -> Result<LogContents> {
        let dir = dir.as_ref();
        let mut contents = LogContents::default();
        for index in list_segments(dir)? {
            let bytes = fs::read(segment_path(dir, index))?;
            let scan = record::scan_frames(&bytes);
            contents.records.extend(scan.records);
            if scan.stop == ScanStop::Corrupt {
                warn!(segment = index, offset = scan.end, "wal.torn_record");
                contents.torn = true;
                break;
            }
        }
        Ok(contents)
    }
}
