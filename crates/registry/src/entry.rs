// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent-side registry entry.
//!
//! Publishes `[cpu_count, job_count]` under a lease and keeps it alive from
//! a background renewal task. A lost lease is not fatal: the entry
//! re-registers itself with a fresh connection and lease under the same key,
//! so observers see at most one renewal interval of absence.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::store::{LeaseId, LeaseStore, StoreConnector, StoreError};
use crate::MAX_PUBLISHED_JOB_COUNT;

/// Lease TTL for agent entries.
pub const ENTRY_TTL: Duration = Duration::from_secs(60);

/// Renew a little before the lease runs out.
fn renew_after(ttl: Duration) -> Duration {
    ttl.saturating_sub(Duration::from_secs(4))
}

fn cpu_count_byte() -> u8 {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    u8::try_from(cpus).unwrap_or(u8::MAX)
}

/// The current registration: swapped wholesale on re-register.
struct Registration {
    store: Arc<dyn LeaseStore>,
    lease: LeaseId,
}

/// Connect, grant a lease, and write the entry value under it.
async fn register_once(
    connector: &Arc<dyn StoreConnector>,
    key: &str,
    value: Vec<u8>,
) -> Result<Registration, StoreError> {
    let store = connector.connect().await?;
    let lease = store.grant(ENTRY_TTL).await?;
    store.put(key, value, lease).await?;
    Ok(Registration { store, lease })
}

struct Inner {
    key: String,
    connector: Arc<dyn StoreConnector>,
    registration: Mutex<Arc<Registration>>,
    cpu_count: u8,
    last_job_count: AtomicU8,
    stop: CancellationToken,
}

impl Inner {
    fn value(&self, job_count: u8) -> Vec<u8> {
        vec![self.cpu_count, job_count]
    }
}

pub struct AgentEntry {
    inner: Arc<Inner>,
}

impl AgentEntry {
    /// Register under `key` and start the renewal task.
    pub async fn register(
        connector: Arc<dyn StoreConnector>,
        key: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let key = key.into();
        info!(key = %key, "register agent");

        let cpu_count = cpu_count_byte();
        let registration = register_once(&connector, &key, vec![cpu_count, 0]).await?;

        let inner = Arc::new(Inner {
            key,
            connector,
            registration: Mutex::new(Arc::new(registration)),
            cpu_count,
            last_job_count: AtomicU8::new(0),
            stop: CancellationToken::new(),
        });

        tokio::spawn(renewal_loop(Arc::clone(&inner)));

        Ok(Self { inner })
    }

    pub fn key(&self) -> &str {
        self.inner.key.as_str()
    }

    /// Publish a new job count, clamped to the one-byte wire range.
    pub async fn update(&self, job_count: usize) {
        let clamped = u8::try_from(job_count).unwrap_or(u8::MAX).min(MAX_PUBLISHED_JOB_COUNT);
        self.inner.last_job_count.store(clamped, Ordering::Relaxed);

        let registration = Arc::clone(&self.inner.registration.lock());
        if let Err(e) = registration
            .store
            .put(&self.inner.key, self.inner.value(clamped), registration.lease)
            .await
        {
            error!(key = %self.inner.key, error = %e, "cannot update agent entry");
        }
    }

    /// Stop renewing and delete the entry by revoking its lease.
    pub async fn close(&self) {
        info!(key = %self.inner.key, "unregister agent");
        self.inner.stop.cancel();

        let registration = Arc::clone(&self.inner.registration.lock());
        if let Err(e) = registration.store.revoke(registration.lease).await {
            warn!(key = %self.inner.key, error = %e, "cannot revoke agent lease");
        }
    }
}

async fn renewal_loop(inner: Arc<Inner>) {
    let mut ttl = ENTRY_TTL;
    loop {
        tokio::select! {
            _ = inner.stop.cancelled() => return,
            _ = tokio::time::sleep(renew_after(ttl)) => {}
        }

        let registration = Arc::clone(&inner.registration.lock());
        match registration.store.keep_alive_once(registration.lease).await {
            Ok(server_ttl) => {
                ttl = server_ttl;
            }
            Err(StoreError::LeaseLost) => {
                warn!(key = %inner.key, "agent entry lease lost, re-registering");
                let value = inner.value(inner.last_job_count.load(Ordering::Relaxed));
                match register_once(&inner.connector, &inner.key, value).await {
                    Ok(fresh) => {
                        *inner.registration.lock() = Arc::new(fresh);
                        ttl = ENTRY_TTL;
                        info!(key = %inner.key, "agent entry re-registered");
                    }
                    Err(e) => {
                        // Short timer so the next tick retries soon.
                        error!(key = %inner.key, error = %e, "re-registration failed");
                        ttl = Duration::from_secs(5);
                    }
                }
            }
            Err(e) => {
                error!(key = %inner.key, error = %e, "cannot renew the agent entry lease");
            }
        }
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
