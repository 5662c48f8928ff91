// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Heap entries and cancellation handles.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Work the pool performs.
#[async_trait]
pub trait PoolJob: Send + Sync + 'static {
    /// Short description used in worker logs.
    fn describe(&self) -> String;

    /// Perform the work. When `cancel` fires, processing should stop as soon
    /// as reasonably possible.
    async fn run(&self, cancel: CancellationToken);
}

/// State shared between the queue, the executing worker, and the handle.
///
/// Before a worker picks the entry up, `job` holds the work and `cancel` is
/// empty; cancellation empties the slot so the worker skips it. Once running,
/// `cancel` holds the per-job token and cancellation fires it.
struct EntrySlot {
    job: Option<Arc<dyn PoolJob>>,
    cancel: Option<CancellationToken>,
    cancelled: bool,
}

pub(crate) struct JobEntry {
    priority: i32,
    seq: u64,
    slot: Mutex<EntrySlot>,
}

impl JobEntry {
    pub(crate) fn new(job: Arc<dyn PoolJob>, priority: i32, seq: u64) -> Arc<Self> {
        Arc::new(Self {
            priority,
            seq,
            slot: Mutex::new(EntrySlot { job: Some(job), cancel: None, cancelled: false }),
        })
    }

    pub(crate) fn priority(&self) -> i32 {
        self.priority
    }

    /// Take the job for execution, installing the worker's cancel token.
    /// Returns `None` when the entry was cancelled before starting.
    pub(crate) fn take(&self, token: &CancellationToken) -> Option<Arc<dyn PoolJob>> {
        let mut slot = self.slot.lock();
        if slot.cancelled {
            return None;
        }
        slot.cancel = Some(token.clone());
        slot.job.take()
    }

    /// Idempotent cancel; safe before or after the job starts.
    pub(crate) fn cancel(&self) {
        let token = {
            let mut slot = self.slot.lock();
            slot.cancelled = true;
            slot.job = None;
            slot.cancel.take()
        };
        if let Some(token) = token {
            token.cancel();
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self.slot.lock().job.as_ref() {
            Some(job) => job.describe(),
            None => "<taken>".to_string(),
        }
    }
}

/// Cancellation handle returned by [`crate::WorkerPool::submit`].
#[derive(Clone)]
pub struct JobHandle {
    entry: Arc<JobEntry>,
}

impl JobHandle {
    pub(crate) fn new(entry: Arc<JobEntry>) -> Self {
        Self { entry }
    }

    /// Cancel the job. May be called any number of times, before or after
    /// the job starts.
    pub fn cancel(&self) {
        self.entry.cancel();
    }
}

/// Max-heap wrapper: higher priority first, FIFO within equal priority.
pub(crate) struct HeapEntry(pub(crate) Arc<JobEntry>);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority == other.0.priority && self.0.seq == other.0.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
