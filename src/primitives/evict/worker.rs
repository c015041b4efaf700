use std::{
    sync::{
        mpsc::{Receiver, RecvTimeoutError, SyncSender},
        Arc,
    },
    time::{Duration, Instant},
};

use lru::LruCache;
use rustc_hash::FxHashMap;
use tracing::trace;

use super::{CacheKey, EvictionOptions, Index, Residency, Slot};

pub(crate) enum Event<K: CacheKey, V> {
    Touch(Arc<Slot<K, V>>),
    Collect(SyncSender<usize>),
    Shutdown,
}

/// Queue bookkeeping, owned by the worker thread alone.
pub(crate) struct Queues<K: CacheKey, V> {
    name: &'static str,
    hot_capacity: usize,
    cold_capacity: usize,
    collect_every: usize,
    admitted: usize,
    hot: LruCache<K, ()>,
    cold: LruCache<K, ()>,
    free: LruCache<K, ()>,
    members: FxHashMap<K, Arc<Slot<K, V>>>,
    index: Index<K, V>,
}

pub(crate) fn run<K: CacheKey, V>(
    mut queues: Queues<K, V>,
    inbox: Receiver<Event<K, V>>,
    interval: Duration,
) {
    let mut last_pass = Instant::now();
    loop {
        let wait = interval.saturating_sub(last_pass.elapsed());
        match inbox.recv_timeout(wait) {
            Ok(Event::Touch(slot)) => queues.touch(slot),
            Ok(Event::Collect(reply)) => {
                let evicted = queues.collect();
                last_pass = Instant::now();
                let _ = reply.send(evicted);
            }
            Ok(Event::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if last_pass.elapsed() >= interval {
            queues.collect();
            last_pass = Instant::now();
        }
    }
    trace!(cache = queues.name, "evict.worker_stopped");
}

fn queue<K: CacheKey>() -> LruCache<K, ()> {
    LruCache::unbounded()
}

impl<K: CacheKey, V> Queues<K, V> {
    pub(crate) fn new(name: &'static str, options: EvictionOptions, index: Index<K, V>) -> Self {
        Self {
            name,
            hot_capacity: options.hot_capacity.max(1),
            cold_capacity: options.cold_capacity.max(1),
            collect_every: options.collect_every.max(1),
            admitted: 0,
            hot: queue(),
            cold: queue(),
            free: queue(),
            members: FxHashMap::default(),
            index,
        }
    }

    fn mark(&self, key: &K, residency: Residency) {
        if let Some(slot) = self.members.get(key) {
            slot.mark(residency);
        }
    }

    fn residency(&self, key: &K) -> Residency {
        self.members
            .get(key)
            .map_or(Residency::Evicted, |slot| slot.residency())
    }

    fn touch(&mut self, slot: Arc<Slot<K, V>>) {
        let key = slot.key();
        match slot.residency() {
            Residency::Evicted => {}
            Residency::Incoming => {
                self.members.insert(key, slot);
                self.admitted += 1;
                if self.admitted % self.collect_every == 0 {
                    self.collect();
                }
                self.admit(key);
            }
            Residency::Hot => {
                let at_tail = self.hot.peek_lru().is_some_and(|(tail, _)| *tail == key);
                self.hot.promote(&key);
                if at_tail {
                    self.reduce();
                }
            }
            Residency::Cold => {
                if self.hot.contains(&key) {
                    // Second touch while cold: the ghost in the hot queue
                    // becomes a real hot entry.
                    self.mark(&key, Residency::Hot);
                    self.cold.pop(&key);
                    self.hot.promote(&key);
                    self.exchange();
                    self.reduce();
                } else {
                    self.cold.promote(&key);
                    self.hot.push(key, ());
                }
            }
            Residency::Free => {
                self.free.pop(&key);
                self.admit(key);
            }
        }
    }

    fn admit(&mut self, key: K) {
        if self.hot.len() < self.hot_capacity {
            self.mark(&key, Residency::Hot);
            self.hot.push(key, ());
        } else if self.cold.len() < self.cold_capacity {
            self.mark(&key, Residency::Cold);
            self.cold.push(key, ());
        } else {
            self.release_cold_tail();
            self.mark(&key, Residency::Cold);
            self.cold.push(key, ());
        }
    }

    fn release_cold_tail(&mut self) {
        if let Some((key, ())) = self.cold.pop_lru() {
            self.hot.pop(&key);
            self.mark(&key, Residency::Free);
            self.free.push(key, ());
        }
    }

    /// Drops hot-queue ghosts of entries that are no longer hot.
    fn reduce(&mut self) {
        while let Some((&key, _)) = self.hot.peek_lru() {
            if self.residency(&key) == Residency::Hot {
                break;
            }
            self.hot.pop_lru();
        }
    }

    /// Demotes the hot tail to cold.
    fn exchange(&mut self) {
        if let Some((&key, _)) = self.hot.peek_lru() {
            if self.residency(&key) != Residency::Hot {
                return;
            }
            self.hot.pop_lru();
            self.mark(&key, Residency::Cold);
            self.cold.push(key, ());
        }
    }

    /// Reaps up to half of the free queue, oldest first, skipping anything
    /// still pinned.
    pub(crate) fn collect(&mut self) -> usize {
        let budget = self.free.len().div_ceil(2);
        let candidates: Vec<K> = self
            .free
            .iter()
            .rev()
            .take(budget)
            .map(|(key, _)| *key)
            .collect();
        let mut evicted = 0;
        for key in candidates {
            let Some(slot) = self.members.get(&key) else {
                self.free.pop(&key);
                continue;
            };
            if !slot.try_retire() {
                continue;
            }
            slot.mark(Residency::Evicted);
            self.free.pop(&key);
            self.members.remove(&key);
            self.index.remove(&key);
            evicted += 1;
        }
        if evicted > 0 {
            trace!(
                cache = self.name,
                evicted,
                resident = self.members.len(),
                "evict.collect"
            );
        }
        evicted
    }
}
