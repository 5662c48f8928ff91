// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory [`LeaseStore`] with real lease expiry.
//!
//! Backs the embedded single-process mode and the registry tests. Lease
//! expiry is enforced lazily on every operation plus a periodic sweep, so
//! watchers observe DELETE events even when nobody touches the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{LeaseId, LeaseStore, StoreConnector, StoreError, WatchEvent};

const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

struct Lease {
    ttl: Duration,
    deadline: Instant,
}

#[derive(Default)]
struct State {
    next_lease: LeaseId,
    leases: HashMap<LeaseId, Lease>,
    kv: HashMap<String, (Vec<u8>, LeaseId)>,
    watchers: Vec<(String, mpsc::Sender<WatchEvent>)>,
}

impl State {
    fn notify(&mut self, event: WatchEvent) {
        let key = match &event {
            WatchEvent::Put { key, .. } | WatchEvent::Delete { key } => key.clone(),
        };
        self.watchers.retain(|(prefix, sender)| {
            if !key.starts_with(prefix.as_str()) {
                return true;
            }
            // try_send: a stalled watcher must not block the store.
            !matches!(sender.try_send(event.clone()), Err(mpsc::error::TrySendError::Closed(_)))
        });
    }

    fn drop_expired(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for lease in expired {
            self.remove_lease(lease);
        }
    }

    fn remove_lease(&mut self, lease: LeaseId) {
        self.leases.remove(&lease);
        let keys: Vec<String> = self
            .kv
            .iter()
            .filter(|(_, (_, owner))| *owner == lease)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.kv.remove(&key);
            self.notify(WatchEvent::Delete { key });
        }
    }
}

#[derive(Clone)]
pub struct MemStore {
    state: Arc<Mutex<State>>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        let store = Self { state: Arc::new(Mutex::new(State::default())) };
        let state = Arc::downgrade(&store.state);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(SWEEP_INTERVAL).await;
                let Some(state) = state.upgrade() else { return };
                state.lock().drop_expired(Instant::now());
            }
        });
        store
    }

    /// Force every lease past its deadline, as an etcd that stopped seeing
    /// keepalives would. Lease-bound keys vanish (watchers observe DELETE)
    /// and the next keepalive gets [`StoreError::LeaseLost`].
    pub fn expire_leases(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        for lease in state.leases.values_mut() {
            lease.deadline = now;
        }
        state.drop_expired(now);
    }
}

#[async_trait]
impl LeaseStore for MemStore {
    async fn grant(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let mut state = self.state.lock();
        state.next_lease += 1;
        let id = state.next_lease;
        state.leases.insert(id, Lease { ttl, deadline: Instant::now() + ttl });
        Ok(id)
    }

    async fn keep_alive_once(&self, lease: LeaseId) -> Result<Duration, StoreError> {
        let mut state = self.state.lock();
        state.drop_expired(Instant::now());
        let entry = state.leases.get_mut(&lease).ok_or(StoreError::LeaseLost)?;
        entry.deadline = Instant::now() + entry.ttl;
        Ok(entry.ttl)
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: LeaseId) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.drop_expired(Instant::now());
        if !state.leases.contains_key(&lease) {
            return Err(StoreError::LeaseLost);
        }
        state.kv.insert(key.to_string(), (value.clone(), lease));
        state.notify(WatchEvent::Put { key: key.to_string(), value });
        Ok(())
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if !state.leases.contains_key(&lease) {
            return Err(StoreError::LeaseLost);
        }
        state.remove_lease(lease);
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut state = self.state.lock();
        state.drop_expired(Instant::now());
        let mut entries: Vec<(String, Vec<u8>)> = state
            .kv
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (value, _))| (key.clone(), value.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>, StoreError> {
        let (event_tx, event_rx) = mpsc::channel(64);
        self.state.lock().watchers.push((prefix.to_string(), event_tx));
        Ok(event_rx)
    }
}

/// Hands out clones of one shared [`MemStore`], so "reconnecting" keeps the
/// same data — matching how an etcd cluster outlives client connections.
pub struct MemConnector {
    store: MemStore,
}

impl MemConnector {
    pub fn new(store: MemStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl StoreConnector for MemConnector {
    async fn connect(&self) -> Result<Arc<dyn LeaseStore>, StoreError> {
        Ok(Arc::new(self.store.clone()))
    }
}
