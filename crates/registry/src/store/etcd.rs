// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! etcd-backed [`LeaseStore`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, EventType, GetOptions, PutOptions, WatchOptions};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{LeaseId, LeaseStore, StoreConnector, StoreError, WatchEvent};

/// Dial-level keepalive so the client survives an etcd container restart.
const DIAL_KEEP_ALIVE: Duration = Duration::from_secs(30);
const DIAL_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(10);

fn map_err(error: etcd_client::Error) -> StoreError {
    // etcd reports an expired lease as "etcdserver: requested lease not found".
    let message = error.to_string();
    if message.contains("lease not found") {
        StoreError::LeaseLost
    } else {
        StoreError::Backend(message)
    }
}

/// Connects [`EtcdStore`]s to a fixed endpoint.
pub struct EtcdConnector {
    endpoint: String,
}

impl EtcdConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into() }
    }
}

#[async_trait]
impl StoreConnector for EtcdConnector {
    async fn connect(&self) -> Result<Arc<dyn LeaseStore>, StoreError> {
        let options = ConnectOptions::new()
            .with_keep_alive(DIAL_KEEP_ALIVE, DIAL_KEEP_ALIVE_TIMEOUT)
            .with_keep_alive_while_idle(true);
        let client = Client::connect([self.endpoint.as_str()], Some(options))
            .await
            .map_err(map_err)?;
        debug!(endpoint = %self.endpoint, "connected to coordination store");
        Ok(Arc::new(EtcdStore { client }))
    }
}

pub struct EtcdStore {
    // etcd-client operations take `&mut self`, but the client is a cheap
    // clone over one shared channel.
    client: Client,
}

#[async_trait]
impl LeaseStore for EtcdStore {
    async fn grant(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let mut client = self.client.clone();
        let response = client.lease_grant(ttl.as_secs() as i64, None).await.map_err(map_err)?;
        Ok(response.id())
    }

    async fn keep_alive_once(&self, lease: LeaseId) -> Result<Duration, StoreError> {
        let mut client = self.client.clone();
        let (mut keeper, mut responses) = client.lease_keep_alive(lease).await.map_err(map_err)?;
        keeper.keep_alive().await.map_err(map_err)?;
        let response = responses
            .message()
            .await
            .map_err(map_err)?
            .ok_or_else(|| StoreError::Backend("keepalive stream closed".to_string()))?;
        // etcd signals a missing lease with TTL 0 instead of an error.
        if response.ttl() <= 0 {
            return Err(StoreError::LeaseLost);
        }
        Ok(Duration::from_secs(response.ttl() as u64))
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: LeaseId) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        client
            .put(key, value, Some(PutOptions::new().with_lease(lease)))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        client.lease_revoke(lease).await.map_err(map_err)?;
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let mut client = self.client.clone();
        let response = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(map_err)?;
        let mut entries = Vec::with_capacity(response.kvs().len());
        for kv in response.kvs() {
            let key = kv.key_str().map_err(map_err)?.to_string();
            entries.push((key, kv.value().to_vec()));
        }
        Ok(entries)
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<mpsc::Receiver<WatchEvent>, StoreError> {
        let mut client = self.client.clone();
        let (watcher, mut stream) = client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await
            .map_err(map_err)?;

        let (event_tx, event_rx) = mpsc::channel(64);
        tokio::spawn(async move {
            // Dropping the watcher cancels the server-side watch.
            let _watcher = watcher;
            loop {
                let response = match stream.message().await {
                    Ok(Some(response)) => response,
                    Ok(None) => break,
                    Err(error) => {
                        warn!(error = %error, "watch stream failed");
                        break;
                    }
                };
                for event in response.events() {
                    let Some(kv) = event.kv() else { continue };
                    let Ok(key) = kv.key_str() else { continue };
                    let converted = match event.event_type() {
                        EventType::Put => {
                            WatchEvent::Put { key: key.to_string(), value: kv.value().to_vec() }
                        }
                        EventType::Delete => WatchEvent::Delete { key: key.to_string() },
                    };
                    if event_tx.send(converted).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(event_rx)
    }
}
