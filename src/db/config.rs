use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    primitives::{evict::EvictionOptions, wal::DEFAULT_FILE_SIZE},
    types::{RadixError, Result},
};

/// Smallest page budget the engine runs with.
pub const MIN_CACHE_PAGES: usize = 2000;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding `IDX`, `N.DAT` and `N.LOG`.
    pub dir: PathBuf,
    /// Page budget for the page cache and the lock table.
    pub cache_pages: usize,
    /// Hot-to-cold ratio of the page cache.
    pub page_cold_multiple: usize,
    /// Hot-to-cold ratio of the lock table.
    pub lock_cold_multiple: usize,
    /// Budget-to-hot ratio of both caches.
    pub free_multiple: usize,
    /// Period of the background eviction pass.
    pub eviction_interval_ms: u64,
    /// A checkpoint starts once the current epoch is this old.
    pub checkpoint_interval_ms: u64,
    /// A checkpoint starts once the current epoch holds this many commits.
    pub checkpoint_commits: usize,
    /// Period of the scheduler's housekeeping tick.
    pub scheduler_interval_ms: u64,
    /// Capacity of each WAL file.
    pub wal_file_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("radixdb"),
            cache_pages: 1 << 16,
            page_cold_multiple: 100,
            lock_cold_multiple: 200,
            free_multiple: 10,
            eviction_interval_ms: 30_000,
            checkpoint_interval_ms: 5_000,
            checkpoint_commits: 1 << 20,
            scheduler_interval_ms: 1_000,
            wal_file_size: DEFAULT_FILE_SIZE,
        }
    }
}

impl Config {
    /// Defaults rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Minimal footprint for tests and tools: the smallest cache, small log
    /// files and frequent housekeeping.
    pub fn small(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache_pages: MIN_CACHE_PAGES,
            checkpoint_interval_ms: 500,
            checkpoint_commits: 256,
            scheduler_interval_ms: 100,
            wal_file_size: 1 << 20,
            ..Self::default()
        }
    }

    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| RadixError::Config(e.to_string()))
    }

    /// Reads a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Serialises to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| RadixError::Config(e.to_string()))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.wal_file_size < 4096 {
            return Err(RadixError::Config(format!(
                "wal_file_size {} is below one page",
                self.wal_file_size
            )));
        }
        if self.free_multiple == 0 || self.page_cold_multiple == 0 || self.lock_cold_multiple == 0 {
            return Err(RadixError::Config("cache multiples must be positive".into()));
        }
        Ok(())
    }

    fn pages(&self) -> usize {
        self.cache_pages.max(MIN_CACHE_PAGES)
    }

    pub(crate) fn page_options(&self) -> EvictionOptions {
        EvictionOptions::for_limit(
            self.pages(),
            self.free_multiple,
            self.page_cold_multiple,
            Duration::from_millis(self.eviction_interval_ms),
        )
    }

    pub(crate) fn lock_options(&self) -> EvictionOptions {
        EvictionOptions::for_limit(
            self.pages(),
            self.free_multiple,
            self.lock_cold_multiple,
            Duration::from_millis(self.eviction_interval_ms),
        )
    }

    pub(crate) fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    pub(crate) fn scheduler_interval(&self) -> Duration {
        Duration::from_millis(self.scheduler_interval_ms.max(1))
    }
}
