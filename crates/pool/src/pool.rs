// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker pool: serializer task + fixed worker set.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::entry::{HeapEntry, JobEntry, JobHandle, PoolJob};

/// Default per-job deadline.
pub const DEFAULT_JOB_MAX_TIME: Duration = Duration::from_secs(30 * 60);

/// Default worker count: one more than the CPU count so an I/O-bound job
/// does not leave a core idle.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) + 1
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool is closed")]
    Closed,
}

/// A worker's request for an entry. The serializer answers through the
/// oneshot, so an entry leaves the heap only for a worker that is ready.
type WorkTicket = oneshot::Sender<Arc<JobEntry>>;

pub struct WorkerPool {
    add_tx: Mutex<Option<mpsc::UnboundedSender<Arc<JobEntry>>>>,
    close_signal: CancellationToken,
    tasks: TaskTracker,
    seq: AtomicU64,
    pending: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Start `worker_count` workers bound to `shutdown`. Workers stop when
    /// `shutdown` is cancelled or the pool is closed; in-flight jobs get a
    /// per-job child token with the `job_max_time` deadline.
    pub fn new(worker_count: usize, job_max_time: Duration, shutdown: CancellationToken) -> Self {
        let (add_tx, add_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = mpsc::channel::<WorkTicket>(worker_count.max(1));

        let pending = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let close_signal = CancellationToken::new();
        let tasks = TaskTracker::new();

        tasks.spawn(serialize(add_rx, ready_rx, shutdown.clone(), Arc::clone(&pending)));

        for index in 0..worker_count.max(1) {
            let worker = Worker {
                index,
                ready_tx: ready_tx.clone(),
                shutdown: shutdown.clone(),
                close_signal: close_signal.clone(),
                job_max_time,
                running: Arc::clone(&running),
            };
            tasks.spawn(worker.run());
        }
        drop(ready_tx);

        // The task set is fixed at construction.
        tasks.close();

        Self {
            add_tx: Mutex::new(Some(add_tx)),
            close_signal,
            tasks,
            seq: AtomicU64::new(0),
            pending,
            running,
        }
    }

    /// Enqueue a job. Never blocks; ordering is by descending priority, FIFO
    /// within a priority level.
    pub fn submit(&self, job: Arc<dyn PoolJob>, priority: i32) -> Result<JobHandle, PoolError> {
        let entry = JobEntry::new(job, priority, self.seq.fetch_add(1, Ordering::Relaxed));
        let handle = JobHandle::new(Arc::clone(&entry));

        let sent = match self.add_tx.lock().as_ref() {
            Some(add_tx) => add_tx.send(entry).is_ok(),
            None => false,
        };
        if !sent {
            handle.cancel();
            return Err(PoolError::Closed);
        }
        Ok(handle)
    }

    /// Jobs accepted but not yet handed to a worker.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Jobs currently executing.
    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop accepting submissions and ask workers to exit after their
    /// current job. Queued entries are cancelled. Idempotent.
    pub fn close(&self) {
        self.add_tx.lock().take();
        self.close_signal.cancel();
    }

    /// Resolves once the serializer and every worker have returned. Callers
    /// bound the wait with their own timer; cancelling the pool's shutdown
    /// token yields a best-effort abort.
    pub async fn done(&self) {
        self.tasks.wait().await;
    }
}

/// Owns the heap. Multiplexes submissions, worker readiness, and shutdown.
///
/// An entry leaves the heap only when a worker's ticket is in hand, so the
/// highest-priority entry at handoff time always wins; submissions arriving
/// while every worker is busy can never be overtaken by an earlier,
/// lower-priority entry parked in a send buffer.
async fn serialize(
    mut add_rx: mpsc::UnboundedReceiver<Arc<JobEntry>>,
    mut ready_rx: mpsc::Receiver<WorkTicket>,
    shutdown: CancellationToken,
    pending: Arc<AtomicUsize>,
) {
    let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
    let mut add_open = true;

    loop {
        pending.store(heap.len(), Ordering::Relaxed);

        if heap.is_empty() && !add_open {
            // Queue drained and no further submissions: dropping `ready_rx`
            // tells idle workers the source is closed.
            debug!("queue drained, serializer exiting");
            return;
        }

        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("stop requested, draining queue");
                while let Some(entry) = heap.pop() {
                    entry.0.cancel();
                }
                while let Ok(entry) = add_rx.try_recv() {
                    entry.cancel();
                }
                pending.store(0, Ordering::Relaxed);
                return;
            }

            received = add_rx.recv(), if add_open => {
                match received {
                    Some(entry) => {
                        debug!(job = %entry.describe(), priority = entry.priority(), "job queued");
                        heap.push(HeapEntry(entry));
                    }
                    None => {
                        debug!("add channel closed, no longer selecting on it");
                        add_open = false;
                    }
                }
            }

            ticket = ready_rx.recv(), if !heap.is_empty() => {
                match ticket {
                    Some(give) => {
                        if let Some(entry) = heap.pop() {
                            if let Err(returned) = give.send(entry.0) {
                                // Worker went away between asking and receiving.
                                heap.push(HeapEntry(returned));
                            }
                        }
                    }
                    None => {
                        // Every worker has exited; nothing will run the rest.
                        debug!("all workers gone, cancelling queued jobs");
                        while let Some(entry) = heap.pop() {
                            entry.0.cancel();
                        }
                        pending.store(0, Ordering::Relaxed);
                        return;
                    }
                }
            }
        }
    }
}

struct Worker {
    index: usize,
    ready_tx: mpsc::Sender<WorkTicket>,
    shutdown: CancellationToken,
    close_signal: CancellationToken,
    job_max_time: Duration,
    running: Arc<AtomicUsize>,
}

impl Worker {
    async fn run(self) {
        let stop_reason = self.work_loop().await;
        debug!(worker = self.index, reason = stop_reason, "stopping");
    }

    async fn work_loop(&self) -> &'static str {
        loop {
            let (give_tx, give_rx) = oneshot::channel();

            tokio::select! {
                _ = self.close_signal.cancelled() => return "pool closed",
                _ = self.shutdown.cancelled() => return "stop requested",
                sent = self.ready_tx.send(give_tx) => {
                    if sent.is_err() {
                        return "input source closed";
                    }
                }
            }

            let mut give_rx = give_rx;
            let entry = tokio::select! {
                _ = self.close_signal.cancelled() => {
                    // The serializer may have already answered the ticket.
                    if let Ok(entry) = give_rx.try_recv() {
                        entry.cancel();
                    }
                    return "pool closed";
                }
                _ = self.shutdown.cancelled() => {
                    if let Ok(entry) = give_rx.try_recv() {
                        entry.cancel();
                    }
                    return "stop requested";
                }
                received = &mut give_rx => match received {
                    Ok(entry) => entry,
                    Err(_) => return "input source closed",
                }
            };

            if self.shutdown.is_cancelled() {
                entry.cancel();
                return "stop requested";
            }

            self.execute(entry).await;
        }
    }

    /// Run one entry under a per-job token with the configured deadline.
    /// The running gauge is released exactly once on every exit path.
    async fn execute(&self, entry: Arc<JobEntry>) {
        let job_token = self.shutdown.child_token();
        let Some(job) = entry.take(&job_token) else {
            debug!(worker = self.index, "entry cancelled before start");
            return;
        };

        debug!(worker = self.index, job = %job.describe(), "starting job");
        let started = Instant::now();

        self.running.fetch_add(1, Ordering::SeqCst);
        let watchdog = tokio::spawn({
            let token = job_token.clone();
            let max = self.job_max_time;
            async move {
                tokio::time::sleep(max).await;
                token.cancel();
            }
        });

        // A panicking job must not take the worker down.
        let outcome =
            std::panic::AssertUnwindSafe(job.run(job_token.clone())).catch_unwind().await;

        watchdog.abort();
        let was_cancelled = job_token.is_cancelled();
        job_token.cancel();
        self.running.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(()) => debug!(
                worker = self.index,
                job = %job.describe(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                cancelled = was_cancelled,
                "job finished"
            ),
            Err(_) => error!(worker = self.index, job = %job.describe(), "job panicked"),
        }
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
