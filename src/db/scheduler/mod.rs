//! Commit scheduler.
//!
//! A single worker thread owns the timestamp counter, the last-write table
//! used for conflict detection, the open-snapshot watermarks and the
//! checkpoint state. Callers talk to it through a bounded queue and block on
//! a reply, so commit order is the order the worker handled the requests.

mod watermark;

use std::{
    collections::BTreeSet,
    sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, error, info, trace, warn};

use crate::types::{RadixError, Result, Timestamp};

use watermark::Watermarks;

const QUEUE_DEPTH: usize = 1024;

/// Durable side of a checkpoint, driven by the scheduler.
pub trait CheckpointTarget: Send + 'static {
    /// Logs the start of a checkpoint at `ts` with the still-open commits.
    fn begin(&self, ts: Timestamp, open: &[Timestamp]) -> Result<()>;
    /// Makes every finished commit durable, logs the end of the checkpoint
    /// and drops the log files it covers.
    fn finish(&self) -> Result<()>;
}

/// Thresholds that start a checkpoint and pace housekeeping.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerOptions {
    /// Commits in one epoch that start a checkpoint.
    pub checkpoint_commits: usize,
    /// Epoch age that starts a checkpoint.
    pub checkpoint_interval: Duration,
    /// Period of garbage collection and time-based checkpoints.
    pub tick: Duration,
}

/// Read-set entry: a key and the timestamp of the version that was seen.
pub type ReadMark = (Vec<u8>, Timestamp);

enum Message {
    Start {
        reply: SyncSender<Timestamp>,
    },
    Commit {
        read_ts: Timestamp,
        reads: Vec<ReadMark>,
        writes: Vec<Vec<u8>>,
        reply: SyncSender<Result<Timestamp>>,
    },
    Done {
        ts: Timestamp,
        reply: SyncSender<()>,
    },
    Release {
        read_ts: Timestamp,
    },
    #[cfg(test)]
    Inspect {
        reply: SyncSender<Snapshot>,
    },
    Shutdown,
}

/// Handle to the scheduler worker.
pub struct Scheduler {
    events: SyncSender<Message>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

fn stopped<T>(_: T) -> RadixError {
    RadixError::UnknownError("scheduler stopped")
}

impl Scheduler {
    /// Starts the worker with the counter at `ts`.
    pub fn spawn(
        ts: Timestamp,
        options: SchedulerOptions,
        target: Box<dyn CheckpointTarget>,
    ) -> Result<Self> {
        let (events, inbox) = mpsc::sync_channel(QUEUE_DEPTH);
        let actor = Actor::new(ts, options, target);
        let worker = thread::Builder::new()
            .name("radixdb-scheduler".into())
            .spawn(move || actor.run(inbox))
            .map_err(RadixError::from)?;
        Ok(Self {
            events,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Registers a snapshot and returns its read timestamp.
    pub fn start(&self) -> Result<Timestamp> {
        let (reply, answer) = mpsc::sync_channel(1);
        self.events.send(Message::Start { reply }).map_err(stopped)?;
        answer.recv().map_err(stopped)
    }

    /// Validates a write transaction and grants its commit timestamp.
    ///
    /// Fails with [`RadixError::TransactionConflict`] when a key in `reads`
    /// was written after the version that was read. The snapshot at
    /// `read_ts` is released either way.
    pub fn commit(
        &self,
        read_ts: Timestamp,
        reads: Vec<ReadMark>,
        writes: Vec<Vec<u8>>,
    ) -> Result<Timestamp> {
        let (reply, answer) = mpsc::sync_channel(1);
        self.events
            .send(Message::Commit {
                read_ts,
                reads,
                writes,
                reply,
            })
            .map_err(stopped)?;
        answer.recv().map_err(stopped)?
    }

    /// Marks commit `ts` as fully applied.
    pub fn done(&self, ts: Timestamp) -> Result<()> {
        let (reply, answer) = mpsc::sync_channel(1);
        self.events
            .send(Message::Done { ts, reply })
            .map_err(stopped)?;
        answer.recv().map_err(stopped)
    }

    /// Releases a snapshot that ends without committing writes.
    pub fn release(&self, read_ts: Timestamp) -> Result<()> {
        self.events
            .send(Message::Release { read_ts })
            .map_err(stopped)
    }

    #[cfg(test)]
    fn inspect(&self) -> Snapshot {
        let (reply, answer) = mpsc::sync_channel(1);
        self.events.send(Message::Inspect { reply }).unwrap();
        answer.recv().unwrap()
    }

    /// Stops the worker and waits for it.
    pub fn shutdown(&self) {
        let _ = self.events.send(Message::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!("scheduler.worker_panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
#[derive(Debug)]
struct Snapshot {
    ts: Timestamp,
    tracked: usize,
    snapshots: usize,
    in_flight: bool,
    current: Vec<Timestamp>,
}

struct Checkpoint {
    in_flight: bool,
    /// Commits of the epoch being checkpointed (or the open epoch).
    current: BTreeSet<Timestamp>,
    /// Commits granted while a checkpoint is in flight.
    next: BTreeSet<Timestamp>,
    epoch_commits: usize,
    epoch_start: Instant,
}

struct Actor {
    ts: Timestamp,
    options: SchedulerOptions,
    target: Box<dyn CheckpointTarget>,
    snapshots: Watermarks,
    last_write: FxHashMap<Vec<u8>, Timestamp>,
    by_ts: BTreeSet<(Timestamp, Vec<u8>)>,
    checkpoint: Checkpoint,
}

impl Actor {
    fn new(ts: Timestamp, options: SchedulerOptions, target: Box<dyn CheckpointTarget>) -> Self {
        Self {
            ts,
            options,
            target,
            snapshots: Watermarks::default(),
            last_write: FxHashMap::default(),
            by_ts: BTreeSet::new(),
            checkpoint: Checkpoint {
                in_flight: false,
                current: BTreeSet::new(),
                next: BTreeSet::new(),
                epoch_commits: 0,
                epoch_start: Instant::now(),
            },
        }
    }

    fn run(mut self, inbox: Receiver<Message>) {
        let mut last_tick = Instant::now();
        loop {
            let wait = self.options.tick.saturating_sub(last_tick.elapsed());
            match inbox.recv_timeout(wait) {
                Ok(Message::Start { reply }) => {
                    self.snapshots.add(self.ts);
                    let _ = reply.send(self.ts);
                }
                Ok(Message::Commit {
                    read_ts,
                    reads,
                    writes,
                    reply,
                }) => {
                    let _ = reply.send(self.commit(read_ts, &reads, writes));
                }
                Ok(Message::Done { ts, reply }) => {
                    self.done(ts);
                    let _ = reply.send(());
                }
                Ok(Message::Release { read_ts }) => {
                    self.snapshots.remove(read_ts);
                }
                #[cfg(test)]
                Ok(Message::Inspect { reply }) => {
                    let _ = reply.send(Snapshot {
                        ts: self.ts,
                        tracked: self.last_write.len(),
                        snapshots: self.snapshots.len(),
                        in_flight: self.checkpoint.in_flight,
                        current: self.checkpoint.current.iter().copied().collect(),
                    });
                }
                Ok(Message::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            if last_tick.elapsed() >= self.options.tick {
                self.tick();
                last_tick = Instant::now();
            }
        }
        info!(ts = self.ts, "scheduler.stopped");
    }

    fn commit(
        &mut self,
        read_ts: Timestamp,
        reads: &[ReadMark],
        writes: Vec<Vec<u8>>,
    ) -> Result<Timestamp> {
        self.snapshots.remove(read_ts);
        for (key, seen) in reads {
            if let Some(&written) = self.last_write.get(key) {
                if written > *seen {
                    debug!(read_ts, seen, written, "scheduler.conflict");
                    return Err(RadixError::TransactionConflict);
                }
            }
        }
        self.ts += 1;
        let ts = self.ts;
        for key in writes {
            if let Some(old) = self.last_write.insert(key.clone(), ts) {
                self.by_ts.remove(&(old, key.clone()));
            }
            self.by_ts.insert((ts, key));
        }
        if self.checkpoint.in_flight {
            self.checkpoint.next.insert(ts);
        } else {
            self.checkpoint.current.insert(ts);
            self.checkpoint.epoch_commits += 1;
            if self.checkpoint.epoch_commits >= self.options.checkpoint_commits {
                self.begin_checkpoint();
            }
        }
        Ok(ts)
    }

    fn done(&mut self, ts: Timestamp) {
        if self.checkpoint.next.remove(&ts) {
            return;
        }
        self.checkpoint.current.remove(&ts);
        if self.checkpoint.in_flight && self.checkpoint.current.is_empty() {
            self.finish_checkpoint();
        }
    }

    fn tick(&mut self) {
        self.collect();
        if self.checkpoint.in_flight {
            if self.checkpoint.current.is_empty() {
                self.finish_checkpoint();
            }
        } else if self.checkpoint.epoch_commits > 0
            && self.checkpoint.epoch_start.elapsed() >= self.options.checkpoint_interval
        {
            self.begin_checkpoint();
        }
    }

    /// Forgets last writes no open snapshot can conflict with.
    fn collect(&mut self) {
        let low = self.snapshots.low().unwrap_or(self.ts);
        let mut dropped = 0;
        while let Some((ts, _)) = self.by_ts.first() {
            if *ts >= low {
                break;
            }
            if let Some((_, key)) = self.by_ts.pop_first() {
                self.last_write.remove(&key);
                dropped += 1;
            }
        }
        if dropped > 0 {
            trace!(low, dropped, tracked = self.last_write.len(), "scheduler.gc");
        }
    }

    fn begin_checkpoint(&mut self) {
        let open: Vec<Timestamp> = self.checkpoint.current.iter().copied().collect();
        if let Err(e) = self.target.begin(self.ts, &open) {
            error!(ts = self.ts, err = %e, "checkpoint.start_failed");
            return;
        }
        info!(ts = self.ts, open = open.len(), "checkpoint.start");
        self.checkpoint.in_flight = true;
        if self.checkpoint.current.is_empty() {
            self.finish_checkpoint();
        }
    }

    fn finish_checkpoint(&mut self) {
        if let Err(e) = self.target.finish() {
            warn!(err = %e, "checkpoint.finish_failed");
            return;
        }
        let checkpoint = &mut self.checkpoint;
        checkpoint.in_flight = false;
        checkpoint.current = std::mem::take(&mut checkpoint.next);
        checkpoint.epoch_commits = checkpoint.current.len();
        checkpoint.epoch_start = Instant::now();
        info!(ts = self.ts, "checkpoint.end");
    }
}
