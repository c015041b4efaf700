//! One memory-mapped, preallocated log file.

#![allow(unsafe_code)]

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use memmap2::MmapMut;

use crate::types::{RadixError, Result};

const SUFFIX: &str = "LOG";

pub(crate) fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("{index}.{SUFFIX}"))
}

/// Indices of the log files in `dir`, ascending.
pub(crate) fn list_segments(dir: &Path) -> Result<Vec<u64>> {
    let mut indices = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some((stem, ext)) = name.split_once('.') else {
            continue;
        };
        if ext != SUFFIX {
            continue;
        }
        if let Ok(index) = stem.parse::<u64>() {
            indices.push(index);
        }
    }
    indices.sort_unstable();
    Ok(indices)
}

pub(crate) struct Segment {
    index: u64,
    // Kept open for the lifetime of the mapping.
    _file: File,
    map: MmapMut,
}

impl Segment {
    /// Opens or creates log file `index`, growing it to at least `capacity`.
    pub(crate) fn open(dir: &Path, index: u64, capacity: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(segment_path(dir, index))?;
        if file.metadata()?.len() < capacity as u64 {
            file.set_len(capacity as u64)?;
            file.sync_all()?;
        }
        // SAFETY: the file is owned by this process and only written through
        // this mapping while the segment is current.
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            index,
            _file: file,
            map,
        })
    }

    pub(crate) fn index(&self) -> u64 {
        self.index
    }

    pub(crate) fn capacity(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.map
    }

    /// Copies `frame` to `offset` and msyncs the touched range.
    pub(crate) fn write(&mut self, offset: usize, frame: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(frame.len())
            .filter(|&end| end <= self.map.len())
            .ok_or(RadixError::OutOfSpace)?;
        self.map[offset..end].copy_from_slice(frame);
        self.map.flush_range(offset, frame.len())?;
        Ok(())
    }
}
