//! Pinning cache with hot, cold and free queues.
//!
//! Pin and unpin are atomic operations on the entry itself and never touch
//! the queues. Every successful acquire posts a notification to a single
//! worker thread that owns the queues and decides what becomes evictable.
//! The worker reaps entries from the free queue by swapping their pin count
//! from `0` to `-1`. A caller that finds `-1` spins until the entry has left
//! the index and then starts over.

#![forbid(unsafe_code)]

mod worker;

use std::{
    fmt,
    hash::Hash,
    ops::Deref,
    sync::{
        atomic::{AtomicI32, AtomicU8, Ordering},
        mpsc::{self, SyncSender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;

use crate::types::{RadixError, Result};

use worker::{Event, Queues};

const EVENT_QUEUE_DEPTH: usize = 1024;
const RETIRED: i32 = -1;

/// Keys the eviction cache can index.
pub trait CacheKey: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Sizing for one eviction cache.
#[derive(Clone, Copy, Debug)]
pub struct EvictionOptions {
    /// Entries kept in the hot queue.
    pub hot_capacity: usize,
    /// Entries kept in the cold queue.
    pub cold_capacity: usize,
    /// A collection pass runs after this many first-time admissions.
    pub collect_every: usize,
    /// Period of the background collection pass.
    pub interval: Duration,
}

impl EvictionOptions {
    /// Derives queue sizes from an overall entry budget: the hot queue gets
    /// `limit / free_multiple` and the cold queue `hot / cold_multiple`.
    pub fn for_limit(
        limit: usize,
        free_multiple: usize,
        cold_multiple: usize,
        interval: Duration,
    ) -> Self {
        let hot_capacity = (limit / free_multiple.max(1)).max(1);
        Self {
            hot_capacity,
            cold_capacity: (hot_capacity / cold_multiple.max(1)).max(1),
            collect_every: limit.max(1),
            interval,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Residency {
    Incoming = 0,
    Hot = 1,
    Cold = 2,
    Free = 3,
    Evicted = 4,
}

impl Residency {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Residency::Hot,
            2 => Residency::Cold,
            3 => Residency::Free,
            4 => Residency::Evicted,
            _ => Residency::Incoming,
        }
    }
}

pub(crate) struct Slot<K, V> {
    key: K,
    pins: AtomicI32,
    residency: AtomicU8,
    value: V,
}

impl<K: CacheKey, V> Slot<K, V> {
    fn pinned(key: K, value: V) -> Self {
        Self {
            key,
            pins: AtomicI32::new(1),
            residency: AtomicU8::new(Residency::Incoming as u8),
            value,
        }
    }

    fn try_pin(&self) -> bool {
        let mut current = self.pins.load(Ordering::Acquire);
        loop {
            if current == RETIRED {
                return false;
            }
            match self.pins.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(seen) => current = seen,
            }
        }
    }

    pub(crate) fn try_retire(&self) -> bool {
        self.pins
            .compare_exchange(0, RETIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn residency(&self) -> Residency {
        Residency::from_u8(self.residency.load(Ordering::Acquire))
    }

    pub(crate) fn mark(&self, residency: Residency) {
        self.residency.store(residency as u8, Ordering::Release);
    }

    pub(crate) fn key(&self) -> K {
        self.key
    }
}

/// An entry held against eviction. Dropping it unpins.
pub struct Pinned<K: CacheKey, V> {
    slot: Arc<Slot<K, V>>,
}

impl<K: CacheKey, V> Pinned<K, V> {
    /// Key this entry was acquired under.
    pub fn key(&self) -> K {
        self.slot.key
    }

    /// Current pin count, including this handle.
    pub fn pins(&self) -> i32 {
        self.slot.pins.load(Ordering::Acquire)
    }
}

impl<K: CacheKey, V> Deref for Pinned<K, V> {
    type Target = V;

    fn deref(&self) -> &V {
        &self.slot.value
    }
}

impl<K: CacheKey, V> Clone for Pinned<K, V> {
    fn clone(&self) -> Self {
        // Already pinned by `self`, so the count cannot be retired.
        self.slot.pins.fetch_add(1, Ordering::AcqRel);
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<K: CacheKey, V> Drop for Pinned<K, V> {
    fn drop(&mut self) {
        self.slot.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) type Index<K, V> = Arc<DashMap<K, Arc<Slot<K, V>>>>;

/// Concurrent pinning cache; see the module docs for the protocol.
pub struct EvictionCache<K: CacheKey, V: Send + Sync + 'static> {
    name: &'static str,
    index: Index<K, V>,
    events: SyncSender<Event<K, V>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K: CacheKey, V: Send + Sync + 'static> EvictionCache<K, V> {
    /// Starts the eviction worker. `name` labels the thread and log events.
    pub fn new(name: &'static str, options: EvictionOptions) -> Result<Self> {
        let index: Index<K, V> = Arc::new(DashMap::new());
        let (events, inbox) = mpsc::sync_channel(EVENT_QUEUE_DEPTH);
        let queues = Queues::new(name, options, Arc::clone(&index));
        let worker = thread::Builder::new()
            .name(format!("{name}-evict"))
            .spawn(move || worker::run(queues, inbox, options.interval))
            .map_err(RadixError::from)?;
        Ok(Self {
            name,
            index,
            events,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Pins the entry for `key`, calling `load` to build it on a miss.
    ///
    /// `load` may run more than once when loaders race or when the entry
    /// found was being reaped.
    pub fn acquire_with<F>(&self, key: K, mut load: F) -> Result<Pinned<K, V>>
    where
        F: FnMut() -> Result<V>,
    {
        loop {
            let found = self.index.get(&key).map(|slot| Arc::clone(slot.value()));
            let slot = match found {
                Some(slot) => slot,
                None => {
                    let value = load()?;
                    match self.index.entry(key) {
                        Entry::Occupied(_) => continue,
                        Entry::Vacant(vacant) => {
                            let slot = Arc::new(Slot::pinned(key, value));
                            vacant.insert(Arc::clone(&slot));
                            self.notify(&slot);
                            return Ok(Pinned { slot });
                        }
                    }
                }
            };
            if slot.try_pin() {
                self.notify(&slot);
                return Ok(Pinned { slot });
            }
            self.wait_removed(&slot);
        }
    }

    /// Publishes a brand new entry under `key`, pinned once.
    pub fn insert(&self, key: K, value: V) -> Result<Pinned<K, V>> {
        match self.index.entry(key) {
            Entry::Occupied(_) => Err(RadixError::UnknownError("cache key already resident")),
            Entry::Vacant(vacant) => {
                let slot = Arc::new(Slot::pinned(key, value));
                vacant.insert(Arc::clone(&slot));
                self.notify(&slot);
                Ok(Pinned { slot })
            }
        }
    }

    /// Whether `key` currently has an entry in the index.
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no entry is resident.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Runs one collection pass on the worker and returns how many entries
    /// it evicted. Notifications sent before the call are processed first.
    pub fn collect(&self) -> usize {
        let (reply, done) = mpsc::sync_channel(1);
        if self.events.send(Event::Collect(reply)).is_err() {
            return 0;
        }
        done.recv().unwrap_or(0)
    }

    fn notify(&self, slot: &Arc<Slot<K, V>>) {
        let _ = self.events.send(Event::Touch(Arc::clone(slot)));
    }

    fn wait_removed(&self, slot: &Arc<Slot<K, V>>) {
        loop {
            let still_there = self
                .index
                .get(&slot.key)
                .is_some_and(|current| Arc::ptr_eq(current.value(), slot));
            if !still_there {
                return;
            }
            std::hint::spin_loop();
            thread::yield_now();
        }
    }

    /// Stops the worker thread. Entries stay readable; nothing is evicted
    /// afterwards.
    pub fn shutdown(&self) {
        let _ = self.events.send(Event::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!(cache = self.name, "evict.worker_panicked");
            }
        }
    }
}

impl<K: CacheKey, V: Send + Sync + 'static> Drop for EvictionCache<K, V> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
