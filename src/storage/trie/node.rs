//! Prefix page accessors: 256 dispatch words followed by 256 direct values.

use crate::{
    primitives::cache::Page,
    types::{page::DIRECT_OFFSET, Branch, PageId, Result},
};

fn word(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn put_word(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn slot_at(byte: u8) -> usize {
    byte as usize * 8
}

fn direct_at(byte: u8) -> usize {
    DIRECT_OFFSET + byte as usize * 8
}

/// Dispatch-table view of a cached page.
pub(crate) trait PrefixPage {
    fn slot(&self, byte: u8) -> u64;
    fn branch(&self, byte: u8) -> Result<Branch>;
    fn direct(&self, byte: u8) -> u64;
    fn set_direct(&self, byte: u8, value: u64);
    fn set_slots(&self, slots: &[(u8, u64)]);
    fn dispatch(&self) -> Vec<u64>;
    /// The run of empty slots around `byte`.
    fn vacant_span(&self, byte: u8) -> Result<(u8, u8)>;
}

impl PrefixPage for Page {
    fn slot(&self, byte: u8) -> u64 {
        word(&self.read(), slot_at(byte))
    }

    fn branch(&self, byte: u8) -> Result<Branch> {
        Branch::decode(self.slot(byte))
    }

    fn direct(&self, byte: u8) -> u64 {
        word(&self.read(), direct_at(byte))
    }

    fn set_direct(&self, byte: u8, value: u64) {
        put_word(&mut self.write(), direct_at(byte), value);
    }

    fn set_slots(&self, slots: &[(u8, u64)]) {
        let mut buf = self.write();
        for &(byte, value) in slots {
            put_word(&mut buf, slot_at(byte), value);
        }
    }

    fn dispatch(&self) -> Vec<u64> {
        let buf = self.read();
        (0..=255u8).map(|b| word(&buf, slot_at(b))).collect()
    }

    fn vacant_span(&self, byte: u8) -> Result<(u8, u8)> {
        let buf = self.read();
        let empty = |b: u8| -> Result<bool> {
            Ok(Branch::decode(word(&buf, slot_at(b)))? == Branch::Empty)
        };
        let mut start = byte;
        while start > 0 && empty(start - 1)? {
            start -= 1;
        }
        let mut end = byte;
        while end < 255 && empty(end + 1)? {
            end += 1;
        }
        Ok((start, end))
    }
}

/// Range of slots in `dispatch` that point at leaf `leaf`.
pub(crate) fn leaf_span(dispatch: &[u64], leaf: PageId) -> Option<(u8, u8)> {
    let points_at = |w: &u64| Branch::decode(*w).ok().and_then(Branch::leaf) == Some(leaf);
    let first = dispatch.iter().position(points_at)?;
    let last = dispatch.iter().rposition(points_at)?;
    Some((first as u8, last as u8))
}

/// Writes a leaf header range in place.
pub(crate) fn set_leaf_range(page: &Page, start: u8, end: u8) {
    let mut buf = page.write();
    buf[2] = start;
    buf[3] = end;
}
