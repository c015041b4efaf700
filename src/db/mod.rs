//! Engine handle.
//!
//! [`Db`] wires the block device, page cache, lock table, index, value
//! store, write-ahead log and commit scheduler together, replays the log on
//! open and hands out [`Transaction`]s.

/// Engine settings and their TOML loader.
pub mod config;
pub mod scheduler;
pub mod transaction;

use std::{
    fs,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use serde::Serialize;
use tracing::{debug, info, warn};

pub use config::Config;
pub use transaction::{Transaction, TxnIter};

use crate::{
    primitives::{
        cache::PageCache,
        disk::Disk,
        locks::LockTable,
        wal::{Record, Wal},
    },
    storage::{
        blob::BlobStore,
        mvcc::Mvcc,
        recovery::{recover, Recovered},
        trie::Trie,
    },
    types::{Result, Timestamp, MAX_TRANSACTION_SIZE},
};
use scheduler::{CheckpointTarget, Scheduler, SchedulerOptions};

/// Name of the index file inside the data directory.
pub const INDEX_FILE: &str = "IDX";

pub(crate) struct Shared {
    config: Config,
    cache: Arc<PageCache>,
    locks: Arc<LockTable>,
    mvcc: Mvcc,
    blobs: Arc<BlobStore>,
    wal: Arc<Wal>,
    scheduler: Scheduler,
    transaction_limit: usize,
    closed: AtomicBool,
}

impl Shared {
    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.scheduler.shutdown();
        self.cache.flush()?;
        self.blobs.flush()?;
        self.cache.shutdown();
        self.locks.shutdown();
        info!(dir = %self.config.dir.display(), "db.close");
        Ok(())
    }
}

/// Checkpoint side effects run by the scheduler worker.
struct Durability {
    cache: Arc<PageCache>,
    blobs: Arc<BlobStore>,
    wal: Arc<Wal>,
}

impl CheckpointTarget for Durability {
    fn begin(&self, ts: Timestamp, open: &[Timestamp]) -> Result<()> {
        // The bracket start must land in the first file kept by truncation.
        self.wal.mark_checkpoint();
        self.wal.append(&Record::StartCheckpoint {
            ts,
            open: open.to_vec(),
        })
    }

    fn finish(&self) -> Result<()> {
        self.cache.flush()?;
        self.blobs.flush()?;
        self.wal.append(&Record::EndCheckpoint)?;
        let removed = self.wal.truncate_checkpointed()?;
        debug!(removed, "checkpoint.truncate");
        Ok(())
    }
}

/// Point-in-time counters of an open engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Pages allocated in the index file.
    pub blocks: u64,
    /// Bytes allocated in the value store.
    pub blob_bytes: u64,
    /// Value store files.
    pub blob_files: usize,
    /// Live write-ahead log files.
    pub wal_files: usize,
    /// Pages held by the page cache.
    pub resident_pages: usize,
    /// Branch locks held by the lock table.
    pub resident_locks: usize,
}

/// An open database.
pub struct Db {
    shared: Arc<Shared>,
    recovered: Recovered,
}

impl Db {
    /// Opens the database in `config.dir`, creating it when missing and
    /// replaying its log otherwise.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.dir)?;
        let dir = config.dir.clone();

        let disk = Arc::new(Disk::open(dir.join(INDEX_FILE))?);
        let cache = Arc::new(PageCache::new(disk, config.page_options())?);
        let locks = Arc::new(LockTable::new(config.lock_options())?);
        let mvcc = Mvcc::new(Trie::new(Arc::clone(&cache), Arc::clone(&locks)));
        let blobs = Arc::new(BlobStore::open(&dir)?);
        let wal = Arc::new(Wal::open(&dir, config.wal_file_size)?);

        let recovered = recover(&dir, &cache, &mvcc, &blobs, &wal)?;

        let scheduler = Scheduler::spawn(
            recovered.ts,
            SchedulerOptions {
                checkpoint_commits: config.checkpoint_commits,
                checkpoint_interval: config.checkpoint_interval(),
                tick: config.scheduler_interval(),
            },
            Box::new(Durability {
                cache: Arc::clone(&cache),
                blobs: Arc::clone(&blobs),
                wal: Arc::clone(&wal),
            }),
        )?;

        let transaction_limit = MAX_TRANSACTION_SIZE.min(config.wal_file_size);
        info!(
            dir = %dir.display(),
            ts = recovered.ts,
            blocks = cache.blocks(),
            "db.open"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                cache,
                locks,
                mvcc,
                blobs,
                wal,
                scheduler,
                transaction_limit,
                closed: AtomicBool::new(false),
            }),
            recovered,
        })
    }

    /// Configuration the engine was opened with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// What the recovery pass did while opening.
    pub fn recovered(&self) -> Recovered {
        self.recovered
    }

    /// Starts a transaction at the current snapshot.
    pub fn begin(&self, read_only: bool) -> Result<Transaction> {
        Transaction::new(Arc::clone(&self.shared), read_only)
    }

    /// Reads `key` in a read-only transaction of its own.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let txn = self.begin(true)?;
        let value = txn.get(key);
        txn.rollback()?;
        value
    }

    /// Writes `key = value` in a transaction of its own.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut txn = self.begin(false)?;
        txn.set(key, value)?;
        txn.commit()
    }

    /// Deletes `key` in a transaction of its own.
    pub fn del(&self, key: &[u8]) -> Result<()> {
        let mut txn = self.begin(false)?;
        txn.del(key)?;
        txn.commit()
    }

    /// Current engine counters.
    pub fn stats(&self) -> Result<Stats> {
        let shared = &self.shared;
        Ok(Stats {
            blocks: shared.cache.blocks(),
            blob_bytes: shared.blobs.size(),
            blob_files: shared.blobs.files(),
            wal_files: shared.wal.segments()?.len(),
            resident_pages: shared.cache.resident(),
            resident_locks: shared.locks.resident(),
        })
    }

    /// Stops background work and syncs the index and value files.
    ///
    /// Transactions still alive afterwards fail on their next scheduler
    /// round trip.
    pub fn close(self) -> Result<()> {
        self.shared.close()
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        if let Err(err) = self.shared.close() {
            warn!(err = %err, "db.close_failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RadixError;
    use tempfile::tempdir;

    fn open(dir: &std::path::Path) -> Db {
        Db::open(Config::small(dir)).unwrap()
    }

    #[test]
    fn fresh_open_formats_and_reopens() {
        let dir = tempdir().unwrap();
        let db = open(dir.path());
        let stats = db.stats().unwrap();
        assert_eq!(stats.blocks, 257);
        assert_eq!(stats.blob_files, 1);
        assert_eq!(stats.wal_files, 1);
        db.close().unwrap();

        let db = open(dir.path());
        assert_eq!(db.recovered().redone, 0);
        assert_eq!(db.stats().unwrap().blocks, 257);
    }

    #[test]
    fn convenience_calls_round_trip() {
        let dir = tempdir().unwrap();
        let db = open(dir.path());
        db.set(b"alpha", b"one").unwrap();
        db.set(b"empty", b"").unwrap();
        assert_eq!(db.get(b"alpha").unwrap(), b"one");
        assert_eq!(db.get(b"empty").unwrap(), b"");
        db.del(b"alpha").unwrap();
        assert!(matches!(db.get(b"alpha"), Err(RadixError::NotExist)));
        assert!(matches!(db.get(b""), Err(RadixError::KeyIsEmpty)));
    }

    #[test]
    fn commits_survive_reopen_without_checkpoint() {
        let dir = tempdir().unwrap();
        {
            let db = open(dir.path());
            for n in 0..50u32 {
                db.set(format!("k{n:03}").as_bytes(), &n.to_le_bytes()).unwrap();
            }
            db.del(b"k010").unwrap();
        }
        let db = open(dir.path());
        assert_eq!(db.get(b"k049").unwrap(), 49u32.to_le_bytes());
        assert!(matches!(db.get(b"k010"), Err(RadixError::NotExist)));
    }

    #[test]
    fn close_is_idempotent_with_drop() {
        let dir = tempdir().unwrap();
        let db = open(dir.path());
        let txn = db.begin(true).unwrap();
        db.close().unwrap();
        assert!(txn.rollback().is_err());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempdir().unwrap();
        let mut config = Config::small(dir.path());
        config.wal_file_size = 16;
        assert!(matches!(Db::open(config), Err(RadixError::Config(_))));
    }
}
