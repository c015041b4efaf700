//! Log record payloads and their framing.
//!
//! A frame is `[crc32c(payload): u32 LE][len(payload): u32 LE][payload]`.
//! Payloads start with a one-byte tag. All integers are little-endian.

use bytes::{Buf, BufMut};

use crate::types::{
    page::FANOUT, Checksum, Crc32c, PageId, RadixError, Result, Timestamp, TreeChange,
};

/// Bytes in front of every payload.
pub const FRAME_HEADER_LEN: usize = 8;

const TAG_END_CHECKPOINT: u8 = 1;
const TAG_START_CHECKPOINT: u8 = 2;
const TAG_COMMIT: u8 = 4;
const TAG_START_TRANSACTION: u8 = 5;
const TAG_WRITE_DATA: u8 = 6;
const TAG_NEW_PREFIX: u8 = 7;
const TAG_CHANGE_PREFIX: u8 = 8;
const TAG_NEW_SUFFIX: u8 = 9;

const START_TRANSACTION_HEADER: usize = 1 + 8 + 4;

/// One buffered write of a transaction. `None` deletes the key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteEntry {
    /// Logical key.
    pub key: Vec<u8>,
    /// New value, or `None` for a delete.
    pub value: Option<Vec<u8>>,
}

impl WriteEntry {
    /// Bytes this entry adds to a `StartTransaction` payload.
    pub fn encoded_len(key: &[u8], value: Option<&[u8]>) -> usize {
        2 + key.len() + 1 + value.map_or(0, |v| 2 + v.len())
    }
}

/// Log record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    /// Full write-set of a transaction that was granted `ts`.
    StartTransaction {
        /// Commit timestamp.
        ts: Timestamp,
        /// Writes in key order.
        writes: Vec<WriteEntry>,
    },
    /// Blob offsets allocated for the non-empty values of `ts`, in write order.
    WriteData {
        /// Commit timestamp.
        ts: Timestamp,
        /// One offset per non-empty value.
        offsets: Vec<u64>,
    },
    /// Transaction `ts` is fully applied.
    CommitTransaction {
        /// Commit timestamp.
        ts: Timestamp,
    },
    /// Structural index change.
    Tree(TreeChange),
    /// Checkpoint begins; `open` were granted but not yet done.
    StartCheckpoint {
        /// Timestamp counter when the checkpoint began.
        ts: Timestamp,
        /// Transactions still in flight.
        open: Vec<Timestamp>,
    },
    /// Every transaction listed by the matching start is done and durable.
    EndCheckpoint,
}

/// Framed size of a `StartTransaction` record with no writes.
pub const fn empty_transaction_frame_len() -> usize {
    FRAME_HEADER_LEN + START_TRANSACTION_HEADER
}

fn need(buf: &[u8], n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(RadixError::UnknownError("truncated log record"));
    }
    Ok(())
}

fn get_u8(buf: &mut &[u8]) -> Result<u8> {
    need(buf, 1)?;
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut &[u8]) -> Result<u16> {
    need(buf, 2)?;
    Ok(buf.get_u16_le())
}

fn get_u32(buf: &mut &[u8]) -> Result<u32> {
    need(buf, 4)?;
    Ok(buf.get_u32_le())
}

fn get_u64(buf: &mut &[u8]) -> Result<u64> {
    need(buf, 8)?;
    Ok(buf.get_u64_le())
}

fn get_bytes(buf: &mut &[u8], n: usize) -> Result<Vec<u8>> {
    need(buf, n)?;
    let out = buf[..n].to_vec();
    buf.advance(n);
    Ok(out)
}

fn get_slots(buf: &mut &[u8]) -> Result<Vec<(u8, u64)>> {
    let count = get_u16(buf)? as usize;
    let mut slots = Vec::with_capacity(count.min(FANOUT));
    for _ in 0..count {
        let slot = get_u8(buf)?;
        slots.push((slot, get_u64(buf)?));
    }
    Ok(slots)
}

fn put_slots(out: &mut Vec<u8>, slots: &[(u8, u64)]) {
    out.put_u16_le(slots.len() as u16);
    for &(slot, word) in slots {
        out.put_u8(slot);
        out.put_u64_le(word);
    }
}

impl Record {
    /// Write-set carried by a `StartTransaction`, empty for other records.
    pub fn writes(&self) -> &[WriteEntry] {
        match self {
            Record::StartTransaction { writes, .. } => writes,
            _ => &[],
        }
    }

    /// Serialises the payload (without frame header).
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Record::StartTransaction { ts, writes } => {
                out.put_u8(TAG_START_TRANSACTION);
                out.put_u64_le(*ts);
                out.put_u32_le(writes.len() as u32);
                for entry in writes {
                    out.put_u16_le(entry.key.len() as u16);
                    out.put_slice(&entry.key);
                    match &entry.value {
                        None => out.put_u8(0),
                        Some(value) => {
                            out.put_u8(1);
                            out.put_u16_le(value.len() as u16);
                            out.put_slice(value);
                        }
                    }
                }
            }
            Record::WriteData { ts, offsets } => {
                out.put_u8(TAG_WRITE_DATA);
                out.put_u64_le(*ts);
                out.put_u32_le(offsets.len() as u32);
                for &offset in offsets {
                    out.put_u64_le(offset);
                }
            }
            Record::CommitTransaction { ts } => {
                out.put_u8(TAG_COMMIT);
                out.put_u64_le(*ts);
            }
            Record::Tree(TreeChange::NewPrefix {
                parent,
                child,
                branch,
                dispatch,
                direct,
            }) => {
                out.put_u8(TAG_NEW_PREFIX);
                out.put_u64_le(parent.0);
                out.put_u64_le(child.0);
                out.put_u8(*branch);
                for &word in dispatch {
                    out.put_u64_le(word);
                }
                put_slots(out, direct);
            }
            Record::Tree(TreeChange::ChangePrefix { page, slots }) => {
                out.put_u8(TAG_CHANGE_PREFIX);
                out.put_u64_le(page.0);
                put_slots(out, slots);
            }
            Record::Tree(TreeChange::NewSuffix {
                page,
                start,
                end,
                value,
            }) => {
                out.put_u8(TAG_NEW_SUFFIX);
                out.put_u64_le(page.0);
                out.put_u8(*start);
                out.put_u8(*end);
                out.put_u64_le(*value);
            }
            Record::StartCheckpoint { ts, open } => {
                out.put_u8(TAG_START_CHECKPOINT);
                out.put_u64_le(*ts);
                out.put_u32_le(open.len() as u32);
                for &ts in open {
                    out.put_u64_le(ts);
                }
            }
            Record::EndCheckpoint => out.put_u8(TAG_END_CHECKPOINT),
        }
    }

    /// Parses a payload produced by [`Record::encode`].
    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let buf = &mut buf;
        let record = match get_u8(buf)? {
            TAG_START_TRANSACTION => {
                let ts = get_u64(buf)?;
                let count = get_u32(buf)? as usize;
                let mut writes = Vec::with_capacity(count.min(1 << 16));
                for _ in 0..count {
                    let key_len = get_u16(buf)? as usize;
                    let key = get_bytes(buf, key_len)?;
                    let value = match get_u8(buf)? {
                        0 => None,
                        1 => {
                            let len = get_u16(buf)? as usize;
                            Some(get_bytes(buf, len)?)
                        }
                        _ => return Err(RadixError::UnknownError("bad write flag")),
                    };
                    writes.push(WriteEntry { key, value });
                }
                Record::StartTransaction { ts, writes }
            }
            TAG_WRITE_DATA => {
                let ts = get_u64(buf)?;
                let count = get_u32(buf)? as usize;
                need(buf, count.saturating_mul(8))?;
                let offsets = (0..count).map(|_| buf.get_u64_le()).collect();
                Record::WriteData { ts, offsets }
            }
            TAG_COMMIT => Record::CommitTransaction { ts: get_u64(buf)? },
            TAG_NEW_PREFIX => {
                let parent = PageId(get_u64(buf)?);
                let child = PageId(get_u64(buf)?);
                let branch = get_u8(buf)?;
                need(buf, FANOUT * 8)?;
                let dispatch = (0..FANOUT).map(|_| buf.get_u64_le()).collect();
                let direct = get_slots(buf)?;
                Record::Tree(TreeChange::NewPrefix {
                    parent,
                    child,
                    branch,
                    dispatch,
                    direct,
                })
            }
            TAG_CHANGE_PREFIX => {
                let page = PageId(get_u64(buf)?);
                let slots = get_slots(buf)?;
                Record::Tree(TreeChange::ChangePrefix { page, slots })
            }
            TAG_NEW_SUFFIX => {
                let page = PageId(get_u64(buf)?);
                let start = get_u8(buf)?;
                let end = get_u8(buf)?;
                let value = get_u64(buf)?;
                Record::Tree(TreeChange::NewSuffix {
                    page,
                    start,
                    end,
                    value,
                })
            }
            TAG_START_CHECKPOINT => {
                let ts = get_u64(buf)?;
                let count = get_u32(buf)? as usize;
                need(buf, count.saturating_mul(8))?;
                let open = (0..count).map(|_| buf.get_u64_le()).collect();
                Record::StartCheckpoint { ts, open }
            }
            TAG_END_CHECKPOINT => Record::EndCheckpoint,
            _ => return Err(RadixError::UnknownError("unknown log record tag")),
        };
        if buf.has_remaining() {
            return Err(RadixError::UnknownError("trailing bytes in log record"));
        }
        Ok(record)
    }

    /// Payload wrapped in its frame header.
    pub fn frame(&self) -> Vec<u8> {
        let mut out = vec![0u8; FRAME_HEADER_LEN];
        self.encode(&mut out);
        let payload_len = (out.len() - FRAME_HEADER_LEN) as u32;
        let crc = payload_checksum(&out[FRAME_HEADER_LEN..]);
        out[..4].copy_from_slice(&crc.to_le_bytes());
        out[4..8].copy_from_slice(&payload_len.to_le_bytes());
        out
    }
}

fn payload_checksum(payload: &[u8]) -> u32 {
    let mut hasher = Crc32c::default();
    hasher.update(payload);
    hasher.finalize()
}

/// Why a frame scan stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanStop {
    /// Reached zero padding or the end of the buffer.
    End,
    /// Found a frame that is truncated, fails its checksum or cannot be
    /// decoded.
    Corrupt,
}

/// Records decoded from one log file.
#[derive(Debug)]
pub struct FrameScan {
    /// Valid records in order.
    pub records: Vec<Record>,
    /// Offset just past the last valid frame.
    pub end: usize,
    /// Why scanning stopped.
    pub stop: ScanStop,
}

/// Decodes consecutive frames from the start of `bytes`.
pub fn scan_frames(bytes: &[u8]) -> FrameScan {
    let mut records = Vec::new();
    let mut offset = 0usize;
    let stop = loop {
        let Some(header) = bytes.get(offset..offset + FRAME_HEADER_LEN) else {
            break ScanStop::End;
        };
        let crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if len == 0 {
            break if crc == 0 { ScanStop::End } else { ScanStop::Corrupt };
        }
        let start = offset + FRAME_HEADER_LEN;
        let Some(payload) = bytes.get(start..start + len) else {
            break ScanStop::Corrupt;
        };
        if payload_checksum(payload) != crc {
            break ScanStop::Corrupt;
        }
        match Record::decode(payload) {
            Ok(record) => records.push(record),
            Err(_) => break ScanStop::Corrupt,
        }
        offset = start + len;
    };
    FrameScan {
        records,
        end: offset,
        stop,
    }
}
