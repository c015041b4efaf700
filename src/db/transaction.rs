//! Snapshot transactions.
//!
//! Reads go to the write-set first and then to the index at the snapshot
//! taken by [`Db::begin`](super::Db::begin). Writes are buffered until
//! commit, which the scheduler validates and orders.

use std::{
    collections::{BTreeMap, VecDeque},
    iter::Peekable,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{error, trace};

use super::Shared;
use crate::{
    primitives::wal::{record::empty_transaction_frame_len, Record, WriteEntry},
    storage::{
        mvcc::{MvccIter, Version},
        trie::Direction,
    },
    types::{check_key, check_value, value, RadixError, Result, Timestamp},
};

/// A unit of isolated work.
///
/// Dropping a transaction that was neither committed nor rolled back rolls
/// it back.
pub struct Transaction {
    shared: Arc<Shared>,
    read_ts: Timestamp,
    read_only: bool,
    reads: Mutex<FxHashMap<Vec<u8>, Timestamp>>,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    size: usize,
    finished: AtomicBool,
}

impl Transaction {
    pub(super) fn new(shared: Arc<Shared>, read_only: bool) -> Result<Self> {
        let read_ts = shared.scheduler.start()?;
        Ok(Self {
            shared,
            read_ts,
            read_only,
            reads: Mutex::new(FxHashMap::default()),
            writes: BTreeMap::new(),
            size: empty_transaction_frame_len(),
            finished: AtomicBool::new(false),
        })
    }

    /// Snapshot timestamp.
    pub fn read_ts(&self) -> Timestamp {
        self.read_ts
    }

    /// Whether mutations are rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn observe(&self, key: &[u8], ts: Timestamp) {
        if !self.read_only {
            self.reads.lock().entry(key.to_vec()).or_insert(ts);
        }
    }

    fn load(&self, version: Version) -> Result<Vec<u8>> {
        match version.value {
            value::EMPTY => Ok(Vec::new()),
            value::CANCEL | value::TOMBSTONE => Err(RadixError::NotExist),
            offset => self.shared.blobs.read(offset),
        }
    }

    /// Value of `key` as seen by this transaction.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        check_key(key)?;
        if let Some(buffered) = self.writes.get(key) {
            return buffered.clone().ok_or(RadixError::NotExist);
        }
        match self.shared.mvcc.get(key, self.read_ts) {
            Ok(version) => {
                self.observe(key, version.ts);
                self.load(version)
            }
            Err(RadixError::NotExist) => {
                self.observe(key, self.read_ts);
                Err(RadixError::NotExist)
            }
            Err(e) => Err(e),
        }
    }

    fn buffer(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        if self.read_only {
            return Err(RadixError::ReadOnlyTransaction);
        }
        check_key(key)?;
        if let Some(value) = value {
            check_value(value)?;
        }
        let previous = self
            .writes
            .get(key)
            .map_or(0, |old| WriteEntry::encoded_len(key, old.as_deref()));
        let size = self.size - previous + WriteEntry::encoded_len(key, value);
        if size > self.shared.transaction_limit {
            return Err(RadixError::OutOfSpace);
        }
        self.size = size;
        self.writes.insert(key.to_vec(), value.map(<[u8]>::to_vec));
        Ok(())
    }

    /// Buffers `key = value`.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.buffer(key, Some(value))
    }

    /// Buffers the deletion of `key`.
    pub fn del(&mut self, key: &[u8]) -> Result<()> {
        self.buffer(key, None)
    }

    /// Ascending keys under `prefix`, including buffered writes.
    pub fn forward(&self, prefix: &[u8]) -> Result<TxnIter<'_>> {
        let inner = self.shared.mvcc.forward(prefix, self.read_ts)?;
        Ok(TxnIter::new(self, prefix, inner, Direction::Forward))
    }

    /// Descending keys under `prefix`, including buffered writes.
    pub fn backward(&self, prefix: &[u8]) -> Result<TxnIter<'_>> {
        let inner = self.shared.mvcc.backward(prefix, self.read_ts)?;
        Ok(TxnIter::new(self, prefix, inner, Direction::Backward))
    }

    fn claim(&self) -> bool {
        self.finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Validates and applies the write-set.
    ///
    /// Returns [`RadixError::TransactionConflict`] without side effects when
    /// a key this transaction read has been written since. Once a commit
    /// timestamp is granted, any failure to apply the writes stops the
    /// process.
    pub fn commit(mut self) -> Result<()> {
        if !self.claim() {
            return Ok(());
        }
        if self.read_only || self.writes.is_empty() {
            return self.shared.scheduler.release(self.read_ts);
        }
        let reads: Vec<_> = std::mem::take(self.reads.get_mut()).into_iter().collect();
        let writes: Vec<WriteEntry> = std::mem::take(&mut self.writes)
            .into_iter()
            .map(|(key, value)| WriteEntry { key, value })
            .collect();
        let keys = writes.iter().map(|w| w.key.clone()).collect();
        let ts = self.shared.scheduler.commit(self.read_ts, reads, keys)?;
        if let Err(e) = self.apply(ts, writes) {
            error!(ts, err = %e, "txn.commit_failed");
            std::process::abort();
        }
        Ok(())
    }

    fn apply(&self, ts: Timestamp, writes: Vec<WriteEntry>) -> Result<()> {
        let shared = &self.shared;
        let start = Record::StartTransaction { ts, writes };
        shared.wal.append(&start)?;

        let mut offsets = Vec::new();
        for write in start.writes() {
            if let Some(bytes) = write.value.as_deref().filter(|v| !v.is_empty()) {
                offsets.push(shared.blobs.alloc(bytes.len())?);
            }
        }
        shared.wal.append(&Record::WriteData {
            ts,
            offsets: offsets.clone(),
        })?;

        let log = &*shared.wal;
        let mut offsets = offsets.into_iter();
        for write in start.writes() {
            match write.value.as_deref() {
                None => shared.mvcc.del(&write.key, ts, log)?,
                Some([]) => shared.mvcc.set(&write.key, value::EMPTY, ts, log)?,
                Some(bytes) => {
                    let offset = offsets
                        .next()
                        .ok_or(RadixError::UnknownError("offset missing for value"))?;
                    shared.blobs.write(offset, bytes)?;
                    shared.mvcc.set(&write.key, offset, ts, log)?;
                }
            }
        }

        shared.wal.append(&Record::CommitTransaction { ts })?;
        shared.scheduler.done(ts)?;
        trace!(ts, writes = start.writes().len(), "txn.commit");
        Ok(())
    }

    /// Discards the write-set. Does nothing after a commit.
    pub fn rollback(self) -> Result<()> {
        self.abandon()
    }

    fn abandon(&self) -> Result<()> {
        if self.claim() {
            self.shared.scheduler.release(self.read_ts)?;
        }
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let _ = self.abandon();
    }
}

/// Ordered iterator over a transaction's view of a key range.
///
/// Holds shared branch locks of the index while alive, so the same thread
/// must not commit another transaction before dropping it.
pub struct TxnIter<'a> {
    txn: &'a Transaction,
    buffered: VecDeque<(&'a [u8], Option<&'a [u8]>)>,
    inner: Peekable<MvccIter>,
    direction: Direction,
}

impl<'a> TxnIter<'a> {
    fn new(txn: &'a Transaction, prefix: &[u8], inner: MvccIter, direction: Direction) -> Self {
        let mut buffered: VecDeque<_> = txn
            .writes
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_slice(), v.as_deref()))
            .collect();
        if direction == Direction::Backward {
            buffered = buffered.into_iter().rev().collect();
        }
        Self {
            txn,
            buffered,
            inner: inner.peekable(),
            direction,
        }
    }
}

/// Whether buffered `key` is yielded no later than `stored`.
fn buffered_first(direction: Direction, key: &[u8], stored: &[u8]) -> bool {
    match direction {
        Direction::Forward => key <= stored,
        Direction::Backward => key >= stored,
    }
}

impl Iterator for TxnIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let take_buffered = match (self.buffered.front(), self.inner.peek()) {
                (None, None) => return None,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (Some(_), Some(Err(_))) => false,
                (Some((key, _)), Some(Ok((stored, _)))) => {
                    buffered_first(self.direction, key, stored)
                }
            };
            if take_buffered {
                let (key, value) = self.buffered.pop_front()?;
                if let Some(Ok((stored, _))) = self.inner.peek() {
                    if stored.as_slice() == key {
                        self.inner.next();
                    }
                }
                match value {
                    Some(v) => return Some(Ok((key.to_vec(), v.to_vec()))),
                    None => continue,
                }
            }
            let (key, version) = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            self.txn.observe(&key, version.ts);
            return Some(self.txn.load(version).map(|v| (key, v)));
        }
    }
}
