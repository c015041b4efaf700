//! Leaf ("suffix") page codec.
//!
//! ```text
//! [count: u16][start: u8][end: u8] then `count` entries of
//! [len: u16][value: u64][suffix: len bytes]
//! ```
//!
//! Suffixes are stored from the branch byte of the owning prefix page
//! onwards, so the first byte of every entry lies in `start..=end`. Entries
//! outside that range are leftovers of an interrupted split and are ignored.

use std::cmp::Ordering;

use crate::types::{Branch, PageId, RadixError, Result, PAGE_SIZE};

pub(crate) const LEAF_HEADER_LEN: usize = 4;
pub(crate) const ENTRY_HEADER_LEN: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct LeafEntry {
    pub(crate) suffix: Vec<u8>,
    pub(crate) value: u64,
}

impl LeafEntry {
    pub(crate) fn new(suffix: &[u8], value: u64) -> Self {
        Self {
            suffix: suffix.to_vec(),
            value,
        }
    }

    fn first(&self) -> u8 {
        self.suffix[0]
    }

    fn size(&self) -> usize {
        ENTRY_HEADER_LEN + self.suffix.len()
    }
}

/// Decoded contents of one leaf page, kept sorted by suffix.
#[derive(Clone, Debug)]
pub(crate) struct LeafImage {
    pub(crate) start: u8,
    pub(crate) end: u8,
    pub(crate) entries: Vec<LeafEntry>,
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(word)
}

/// Walks the raw entries of a leaf page.
fn raw_entries<'a>(buf: &'a [u8]) -> impl Iterator<Item = Result<(&'a [u8], u64)>> + 'a {
    let count = read_u16(buf, 0) as usize;
    let mut at = LEAF_HEADER_LEN;
    (0..count).map(move |_| {
        if at + ENTRY_HEADER_LEN > buf.len() {
            return Err(RadixError::UnknownError("leaf entry header overruns page"));
        }
        let len = read_u16(buf, at) as usize;
        let value = read_u64(buf, at + 2);
        let start = at + ENTRY_HEADER_LEN;
        if len == 0 || start + len > buf.len() {
            return Err(RadixError::UnknownError("leaf entry overruns page"));
        }
        at = start + len;
        Ok((&buf[start..start + len], value))
    })
}

impl LeafImage {
    pub(crate) fn empty(start: u8, end: u8) -> Self {
        Self {
            start,
            end,
            entries: Vec::new(),
        }
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self> {
        let (start, end) = (buf[2], buf[3]);
        if start > end {
            return Err(RadixError::UnknownError("leaf range inverted"));
        }
        let mut entries = Vec::new();
        for entry in raw_entries(buf) {
            let (suffix, value) = entry?;
            if (start..=end).contains(&suffix[0]) {
                entries.push(LeafEntry::new(suffix, value));
            }
        }
        entries.sort_by(|a, b| a.suffix.cmp(&b.suffix));
        Ok(Self {
            start,
            end,
            entries,
        })
    }

    /// Looks `suffix` up directly in a page buffer.
    pub(crate) fn lookup(buf: &[u8], suffix: &[u8]) -> Result<Option<u64>> {
        let (start, end) = (buf[2], buf[3]);
        if !(start..=end).contains(&suffix[0]) {
            return Ok(None);
        }
        for entry in raw_entries(buf) {
            let (found, value) = entry?;
            match found.cmp(suffix) {
                Ordering::Equal => return Ok(Some(value)),
                Ordering::Greater => return Ok(None),
                Ordering::Less => {}
            }
        }
        Ok(None)
    }

    pub(crate) fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        buf[..2].copy_from_slice(&(self.entries.len() as u16).to_le_bytes());
        buf[2] = self.start;
        buf[3] = self.end;
        let mut at = LEAF_HEADER_LEN;
        for entry in &self.entries {
            buf[at..at + 2].copy_from_slice(&(entry.suffix.len() as u16).to_le_bytes());
            buf[at + 2..at + 10].copy_from_slice(&entry.value.to_le_bytes());
            at += ENTRY_HEADER_LEN;
            buf[at..at + entry.suffix.len()].copy_from_slice(&entry.suffix);
            at += entry.suffix.len();
        }
    }

    pub(crate) fn used(&self) -> usize {
        LEAF_HEADER_LEN + self.entries.iter().map(LeafEntry::size).sum::<usize>()
    }

    pub(crate) fn is_single(&self) -> bool {
        self.start == self.end
    }

    pub(crate) fn first_byte(&self) -> Option<u8> {
        self.entries.first().map(LeafEntry::first)
    }

    pub(crate) fn last_byte(&self) -> Option<u8> {
        self.entries.last().map(LeafEntry::first)
    }

    /// Dispatch word a parent stores for this leaf at page `id`.
    pub(crate) fn branch(&self, id: PageId) -> Branch {
        if self.is_single() {
            Branch::Suffix(id)
        } else {
            Branch::Mixed(id)
        }
    }

    /// Replaces an existing entry or inserts a new one if it fits.
    pub(crate) fn try_put(&mut self, entry: &LeafEntry) -> bool {
        match self
            .entries
            .binary_search_by(|probe| probe.suffix.as_slice().cmp(&entry.suffix))
        {
            Ok(at) => {
                self.entries[at].value = entry.value;
                true
            }
            Err(at) => {
                if self.used() + entry.size() > PAGE_SIZE {
                    return false;
                }
                self.entries.insert(at, entry.clone());
                true
            }
        }
    }

    /// Moves out the entries whose first byte satisfies `pred`.
    pub(crate) fn take_where(&mut self, pred: impl Fn(u8) -> bool) -> Vec<LeafEntry> {
        let (taken, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| pred(entry.first()));
        self.entries = kept;
        taken
    }
}
