//! Multi-version layer over the trie.
//!
//! Each write of a logical key stores one physical entry keyed by
//! `key ++ ts` with the timestamp big-endian, so versions of a key sort by
//! timestamp. A reader at `read_ts` sees the newest version not after its
//! snapshot; [`value::CANCEL`] versions are invisible and a
//! [`value::TOMBSTONE`] version hides the key.

use std::iter::Peekable;

use super::trie::{TreeLog, Trie, TrieIter};
use crate::types::{value, RadixError, Result, Timestamp};

const TS_LEN: usize = 8;

/// Physical trie key of `key` at `ts`.
pub fn version_key(key: &[u8], ts: Timestamp) -> Vec<u8> {
    let mut physical = Vec::with_capacity(key.len() + TS_LEN);
    physical.extend_from_slice(key);
    physical.extend_from_slice(&ts.to_be_bytes());
    physical
}

fn split_version(physical: &[u8]) -> Option<(&[u8], Timestamp)> {
    let at = physical.len().checked_sub(TS_LEN)?;
    let mut ts = [0u8; TS_LEN];
    ts.copy_from_slice(&physical[at..]);
    Some((&physical[..at], Timestamp::from_be_bytes(ts)))
}

/// A visible version of a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    /// Value word stored in the trie.
    pub value: u64,
    /// Commit timestamp of the version.
    pub ts: Timestamp,
}

/// Versioned view of a [`Trie`].
pub struct Mvcc {
    trie: Trie,
}

impl Mvcc {
    /// Wraps `trie`.
    pub fn new(trie: Trie) -> Self {
        Self { trie }
    }

    /// Underlying trie.
    pub fn trie(&self) -> &Trie {
        &self.trie
    }

    /// Newest version of `key` visible at `read_ts`.
    pub fn get(&self, key: &[u8], read_ts: Timestamp) -> Result<Version> {
        // Every candidate timestamp is at most `read_ts`, so it shares the
        // leading zero bytes of `read_ts`.
        let zeros = (read_ts.leading_zeros() / 8) as usize;
        let mut prefix = key.to_vec();
        prefix.resize(key.len() + zeros, 0);
        for item in self.trie.backward(&prefix)? {
            let (physical, word) = item?;
            if physical.len() != key.len() + TS_LEN {
                continue;
            }
            let Some((_, ts)) = split_version(&physical) else {
                continue;
            };
            if ts > read_ts || word == value::CANCEL {
                continue;
            }
            if word == value::TOMBSTONE {
                return Err(RadixError::NotExist);
            }
            return Ok(Version { value: word, ts });
        }
        Err(RadixError::NotExist)
    }

    /// Writes version `ts` of `key`.
    pub fn set(&self, key: &[u8], word: u64, ts: Timestamp, log: &dyn TreeLog) -> Result<()> {
        self.trie.set(&version_key(key, ts), word, log)
    }

    /// Writes a tombstone version of `key` at `ts`.
    pub fn del(&self, key: &[u8], ts: Timestamp, log: &dyn TreeLog) -> Result<()> {
        self.set(key, value::TOMBSTONE, ts, log)
    }

    /// Voids version `ts` of `key`, as if it had never been written.
    pub fn cancel(&self, key: &[u8], ts: Timestamp, log: &dyn TreeLog) -> Result<()> {
        self.trie.del(&version_key(key, ts), log)
    }

    /// Ascending visible keys under `prefix` at `read_ts`.
    pub fn forward(&self, prefix: &[u8], read_ts: Timestamp) -> Result<MvccIter> {
        Ok(MvccIter {
            inner: self.trie.forward(prefix)?.peekable(),
            read_ts,
        })
    }

    /// Descending visible keys under `prefix` at `read_ts`.
    pub fn backward(&self, prefix: &[u8], read_ts: Timestamp) -> Result<MvccIter> {
        Ok(MvccIter {
            inner: self.trie.backward(prefix)?.peekable(),
            read_ts,
        })
    }
}

/// Collapses runs of physical versions into one visible entry per key.
pub struct MvccIter {
    inner: Peekable<TrieIter>,
    read_ts: Timestamp,
}

impl MvccIter {
    fn candidate(&self, physical: &[u8], word: u64) -> Option<Version> {
        let (_, ts) = split_version(physical)?;
        (ts <= self.read_ts && word != value::CANCEL).then_some(Version { value: word, ts })
    }
}

impl Iterator for MvccIter {
    type Item = Result<(Vec<u8>, Version)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (physical, word) = match self.inner.next()? {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            let Some((key, _)) = split_version(&physical) else {
                continue;
            };
            let key = key.to_vec();
            let mut best = self.candidate(&physical, word);
            while let Some(Ok((next, _))) = self.inner.peek() {
                if split_version(next).map(|(k, _)| k) != Some(key.as_slice()) {
                    break;
                }
                if let Some(Ok((next, word))) = self.inner.next() {
                    if let Some(version) = self.candidate(&next, word) {
                        if best.map_or(true, |b| version.ts > b.ts) {
                            best = Some(version);
                        }
                    }
                }
            }
            match best {
                Some(version) if version.value != value::TOMBSTONE => {
                    return Some(Ok((key, version)))
                }
                _ => continue,
            }
        }
    }
}
