//! Replays the write-ahead log after a restart.
//!
//! Replay starts at the newest complete checkpoint bracket, or at the first
//! record when there is none. Structural index records are re-applied first
//! and unconditionally. Then every transaction whose `StartTransaction`
//! follows the anchor is redone when it committed (or was still open when
//! the anchoring checkpoint began) and undone otherwise.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use tracing::{debug, info};

use super::{blob::BlobStore, mvcc::Mvcc};
use crate::{
    primitives::{
        cache::PageCache,
        wal::{Record, Wal, WriteEntry},
    },
    types::{value, RadixError, Result, Timestamp},
};

/// What a recovery pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Recovered {
    /// Timestamp counter to resume from.
    pub ts: Timestamp,
    /// Structural records re-applied.
    pub structural: usize,
    /// Committed transactions re-applied.
    pub redone: usize,
    /// Unfinished transactions voided.
    pub undone: usize,
    /// Whether the log ended in a damaged frame.
    pub torn: bool,
}

/// Index of the `StartCheckpoint` of the newest complete bracket.
fn anchor(records: &[Record]) -> Option<usize> {
    let mut end_seen = false;
    for (at, record) in records.iter().enumerate().rev() {
        match record {
            Record::EndCheckpoint => end_seen = true,
            Record::StartCheckpoint { .. } if end_seen => return Some(at),
            _ => {}
        }
    }
    None
}

/// Replays the log found in `dir` into the index and value store, then
/// makes the result durable and restarts the log from a fresh checkpoint.
///
/// Structural changes made while replaying are logged to `wal`.
pub fn recover(
    dir: impl AsRef<Path>,
    cache: &PageCache,
    mvcc: &Mvcc,
    blobs: &BlobStore,
    wal: &Wal,
) -> Result<Recovered> {
    let log = Wal::read_all(dir)?;
    let from = anchor(&log.records);
    let records = &log.records[from.unwrap_or(0)..];
    let mut summary = Recovered {
        torn: log.torn,
        ..Recovered::default()
    };

    let open_at_anchor: HashSet<Timestamp> = match (from, records.first()) {
        (Some(_), Some(Record::StartCheckpoint { open, .. })) => open.iter().copied().collect(),
        _ => HashSet::new(),
    };
    let mut committed = HashSet::new();
    let mut offsets: HashMap<Timestamp, &[u64]> = HashMap::new();
    let mut highest_page = 0;
    for record in records {
        match record {
            Record::StartCheckpoint { ts, .. } => summary.ts = summary.ts.max(*ts),
            Record::StartTransaction { ts, .. } => summary.ts = summary.ts.max(*ts),
            Record::CommitTransaction { ts } => {
                summary.ts = summary.ts.max(*ts);
                committed.insert(*ts);
            }
            Record::WriteData { ts, offsets: at } => {
                offsets.insert(*ts, at.as_slice());
            }
            Record::Tree(change) => highest_page = highest_page.max(change.max_page()),
            Record::EndCheckpoint => {}
        }
    }
    cache.reserve(highest_page + 1);

    for record in records {
        if let Record::Tree(change) = record {
            mvcc.trie().apply(change)?;
            summary.structural += 1;
        }
    }

    for record in records {
        let Record::StartTransaction { ts, writes } = record else {
            continue;
        };
        if committed.contains(ts) || open_at_anchor.contains(ts) {
            let at = offsets
                .get(ts)
                .copied()
                .ok_or(RadixError::UnknownError("committed transaction without data record"))?;
            redo(*ts, writes, at, mvcc, blobs, wal)?;
            summary.redone += 1;
        } else {
            for write in writes {
                mvcc.cancel(&write.key, *ts, wal)?;
            }
            for &offset in offsets.get(ts).copied().unwrap_or_default() {
                blobs.del(offset)?;
            }
            debug!(ts, writes = writes.len(), "recovery.undo");
            summary.undone += 1;
        }
    }

    cache.flush()?;
    blobs.flush()?;
    wal.reset(summary.ts)?;
    info!(
        ts = summary.ts,
        structural = summary.structural,
        redone = summary.redone,
        undone = summary.undone,
        torn = summary.torn,
        "recovery.done"
    );
    Ok(summary)
}

fn redo(
    ts: Timestamp,
    writes: &[WriteEntry],
    offsets: &[u64],
    mvcc: &Mvcc,
    blobs: &BlobStore,
    wal: &Wal,
) -> Result<()> {
    let mut offsets = offsets.iter().copied();
    for write in writes {
        match write.value.as_deref() {
            None => mvcc.del(&write.key, ts, wal)?,
            Some([]) => mvcc.set(&write.key, value::EMPTY, ts, wal)?,
            Some(bytes) => {
                let offset = offsets
                    .next()
                    .ok_or(RadixError::UnknownError("write data record too short"))?;
                blobs.write(offset, bytes)?;
                mvcc.set(&write.key, offset, ts, wal)?;
            }
        }
    }
    debug!(ts, writes = writes.len(), "recovery.redo");
    Ok(())
}
