// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordination-store seam.
//!
//! [`LeaseStore`] is the minimal surface the registry needs: leases with
//! single-shot keepalive, lease-bound puts, prefix reads, and prefix watches.
//! [`EtcdStore`] is the production implementation; [`MemStore`] backs tests
//! and the embedded single-process mode.

mod etcd;
mod mem;

pub use etcd::{EtcdConnector, EtcdStore};
pub use mem::{MemConnector, MemStore};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub type LeaseId = i64;

/// A change observed under a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The lease expired or was revoked; the holder must re-register.
    #[error("lease not found")]
    LeaseLost,

    #[error("coordination store error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Grant a lease; returns its id. The server may adjust the TTL.
    async fn grant(&self, ttl: Duration) -> Result<LeaseId, StoreError>;

    /// Single-shot keepalive. Returns the server-selected remaining TTL.
    /// Fails with [`StoreError::LeaseLost`] when the lease no longer exists.
    async fn keep_alive_once(&self, lease: LeaseId) -> Result<Duration, StoreError>;

    /// Write `key = value` bound to `lease`; the key disappears with it.
    async fn put(&self, key: &str, value: Vec<u8>, lease: LeaseId) -> Result<(), StoreError>;

    /// Revoke the lease, deleting its keys immediately.
    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError>;

    /// All key/value pairs under `prefix`.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Stream of changes under `prefix`. The stream ends when the store
    /// connection is lost or the receiver is dropped.
    async fn watch_prefix(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>, StoreError>;
}

/// Produces store connections; the agent entry reconnects through this when
/// its lease is lost.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn LeaseStore>, StoreError>;
}

#[cfg(test)]
#[path = "mem_tests.rs"]
mod tests;
