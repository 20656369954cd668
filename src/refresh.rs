//! Bounded worker pool for background refreshes.
//!
//! A fixed number of worker tasks drain one bounded queue. Submitting never
//! blocks the caller: when the queue is full the job is parked on a small task
//! that waits for queue space, so a saturated pool delays refreshes instead of
//! losing them.
//!
//! Keyed submissions collapse: while a job for a key is waiting (queued or
//! parked, not yet started) further jobs for that key are dropped in its
//! favour. The waiting job refreshes the key, so nothing is starved, and the
//! backlog stays bounded by the number of distinct keys.
//!
//! Lifecycle: workers start in [`RefreshPool::new`]; [`RefreshPool::shutdown`]
//! stops intake, lets everything already submitted finish, and joins the
//! workers.

use std::panic::AssertUnwindSafe;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc::error::{SendError, TrySendError};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::RefreshConfig;

/// A unit of background work.
pub type RefreshJob = BoxFuture<'static, ()>;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    #[error("Refresh pool is shut down")]
    Closed,
}

/// How an accepted job was placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// On the queue.
    Queued,
    /// Queue full; a parked task is waiting for space.
    Parked,
    /// A job for the same key was already waiting; this one was dropped.
    Collapsed,
}

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub total_submitted: u64,
    pub total_completed: u64,
    pub total_parked: u64,
    pub total_collapsed: u64,
    pub total_panicked: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    parked: AtomicU64,
    collapsed: AtomicU64,
    panicked: AtomicU64,
}

struct Task {
    key: Option<String>,
    job: RefreshJob,
}

struct Shared {
    name: String,
    pending: AtomicUsize,
    idle: Notify,
    counters: Counters,
    waiting: Mutex<HashSet<String>>,
}

impl Shared {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn waiting(&self) -> MutexGuard<'_, HashSet<String>> {
        self.waiting
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The job for `key` left the queue, either to run or because it was rejected.
    fn release(&self, key: Option<&str>) {
        if let Some(key) = key {
            self.waiting().remove(key);
        }
    }
}

/// Fixed-size pool running [`RefreshJob`]s.
pub struct RefreshPool {
    shared: Arc<Shared>,
    sender: RwLock<Option<mpsc::Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RefreshPool {
    /// Start the pool's workers. Must be called inside a tokio runtime.
    pub fn new(config: &RefreshConfig) -> Self {
        let workers = config.workers.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(AsyncMutex::new(rx));

        let shared = Arc::new(Shared {
            name: config.name.clone(),
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
            counters: Counters::default(),
            waiting: Mutex::new(HashSet::new()),
        });

        let handles = (1..=workers)
            .map(|id| {
                let span = info_span!("refresh_worker", worker = %format!("{}-{id}", config.name));
                tokio::spawn(run_worker(shared.clone(), rx.clone()).instrument(span))
            })
            .collect();

        info!(
            pool = %config.name,
            workers,
            queue_capacity = config.queue_capacity,
            "Refresh pool started"
        );

        Self {
            shared,
            sender: RwLock::new(Some(tx)),
            workers: Mutex::new(handles),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Queue a job without waiting.
    ///
    /// Fails only once the pool has been shut down.
    pub fn submit(&self, job: RefreshJob) -> Result<Submission, PoolError> {
        self.enqueue(None, job)
    }

    /// Queue a job for `key`, unless one for the same key is still waiting.
    pub fn submit_keyed(
        &self,
        key: impl Into<String>,
        job: RefreshJob,
    ) -> Result<Submission, PoolError> {
        self.enqueue(Some(key.into()), job)
    }

    fn enqueue(&self, key: Option<String>, job: RefreshJob) -> Result<Submission, PoolError> {
        let sender = self
            .sender
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(PoolError::Closed)?;

        if let Some(key) = &key {
            if !self.shared.waiting().insert(key.clone()) {
                self.shared.counters.collapsed.fetch_add(1, Ordering::Relaxed);
                debug!(pool = %self.shared.name, key = %key, "Refresh already waiting");
                return Ok(Submission::Collapsed);
            }
        }

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);

        match sender.try_send(Task { key, job }) {
            Ok(()) => Ok(Submission::Queued),
            Err(TrySendError::Full(task)) => {
                self.shared.counters.parked.fetch_add(1, Ordering::Relaxed);
                debug!(pool = %self.shared.name, "Refresh queue full, parking job");

                let shared = self.shared.clone();
                tokio::spawn(async move {
                    if let Err(SendError(task)) = sender.send(task).await {
                        warn!(pool = %shared.name, "Pool closed before parked job was queued");
                        shared.release(task.key.as_deref());
                        shared.finish_one();
                    }
                });
                Ok(Submission::Parked)
            }
            Err(TrySendError::Closed(task)) => {
                self.shared.release(task.key.as_deref());
                self.shared.finish_one();
                Err(PoolError::Closed)
            }
        }
    }

    /// Jobs submitted but not yet finished, including queued and parked ones.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Resolve once every submitted job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Stop accepting jobs, drain what was submitted, and join the workers.
    pub async fn shutdown(&self) {
        let sender = self
            .sender
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handles = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(pool = %self.shared.name, error = %e, "Refresh worker ended abnormally");
            }
        }

        info!(pool = %self.shared.name, stats = ?self.stats(), "Refresh pool shut down");
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.shared.counters;
        PoolStats {
            total_submitted: c.submitted.load(Ordering::Relaxed),
            total_completed: c.completed.load(Ordering::Relaxed),
            total_parked: c.parked.load(Ordering::Relaxed),
            total_collapsed: c.collapsed.load(Ordering::Relaxed),
            total_panicked: c.panicked.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RefreshPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshPool")
            .field("name", &self.shared.name)
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_worker(shared: Arc<Shared>, rx: Arc<AsyncMutex<mpsc::Receiver<Task>>>) {
    loop {
        let task = { rx.lock().await.recv().await };
        let Some(Task { key, job }) = task else {
            break;
        };
        shared.release(key.as_deref());

        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            shared.counters.panicked.fetch_add(1, Ordering::Relaxed);
            warn!("Refresh job panicked");
        }
        shared.counters.completed.fetch_add(1, Ordering::Relaxed);
        shared.finish_one();
    }
    debug!("Refresh worker exiting");
}
