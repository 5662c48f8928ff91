// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Router-side registry view.
//!
//! Keeps the last full snapshot of `/builders/` plus a wall-clock stamp.
//! The watch task mutates known entries in place (the common case: an agent
//! reporting a load change) and invalidates the snapshot on topology
//! changes, so the next query refetches.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::store::{LeaseStore, StoreError, WatchEvent};
use crate::BUILDERS_PREFIX;

/// Serving a slightly stale list is fine; a dead address fails health checks
/// on the client side. Refetching on every request is not.
const AGENT_LIST_TTL: Duration = Duration::from_secs(5 * 60);

/// One agent as seen by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildAgent {
    pub address: String,
    pub cpu_count: u32,
    pub job_count: u32,
}

impl BuildAgent {
    fn apply(&mut self, value: &[u8]) {
        self.cpu_count = u32::from(*value.first().unwrap_or(&0));
        self.job_count = u32::from(*value.get(1).unwrap_or(&0));
    }
}

struct Cache {
    agents: Option<HashMap<String, BuildAgent>>,
    last_update: Instant,
}

impl Cache {
    /// The snapshot, if present and fresh.
    fn valid(&self) -> Option<&HashMap<String, BuildAgent>> {
        let agents = self.agents.as_ref()?;
        if self.last_update.elapsed() < AGENT_LIST_TTL {
            Some(agents)
        } else {
            debug!("agent list outdated, refetching");
            None
        }
    }
}

pub struct AgentRegistry {
    store: Arc<dyn LeaseStore>,
    cache: Arc<RwLock<Cache>>,
}

/// `/builders/<host>:<port>` → `<host>:<port>`.
fn key_to_address(key: &str) -> String {
    match key.rfind('/') {
        Some(index) => key[index + 1..].to_string(),
        None => key.to_string(),
    }
}

impl AgentRegistry {
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self {
            store,
            cache: Arc::new(RwLock::new(Cache { agents: None, last_update: Instant::now() })),
        }
    }

    /// Start the background watch task.
    pub async fn listen(&self) -> Result<(), StoreError> {
        let mut events = self.store.watch_prefix(BUILDERS_PREFIX).await?;
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                handle_event(&cache, event).await;
            }
            debug!("registry watch stream ended");
        });
        Ok(())
    }

    /// The current agent map, refetched when the snapshot is missing or
    /// older than [`AGENT_LIST_TTL`].
    pub async fn agents(&self) -> Result<HashMap<String, BuildAgent>, StoreError> {
        if let Some(agents) = self.cache.read().await.valid() {
            return Ok(agents.clone());
        }

        // Promote to the write lock and recheck: a concurrent query may
        // have refetched already, and holding the lock across the fetch
        // keeps the rest of the herd waiting instead of refetching too.
        let mut cache = self.cache.write().await;
        if let Some(agents) = cache.valid() {
            return Ok(agents.clone());
        }

        let entries = self.store.get_prefix(BUILDERS_PREFIX).await?;
        let mut agents = HashMap::with_capacity(entries.len());
        for (key, value) in entries {
            if value.len() < 2 {
                warn!(key = %key, len = value.len(), "malformed agent entry, skipping");
                continue;
            }
            let address = key_to_address(&key);
            let mut agent = BuildAgent { address: address.clone(), cpu_count: 0, job_count: 0 };
            agent.apply(&value);
            agents.insert(address, agent);
        }

        cache.agents = Some(agents.clone());
        cache.last_update = Instant::now();
        Ok(agents)
    }

    #[cfg(test)]
    async fn cached(&self) -> Option<HashMap<String, BuildAgent>> {
        self.cache.read().await.agents.clone()
    }
}

async fn handle_event(cache: &RwLock<Cache>, event: WatchEvent) {
    let mut cache = cache.write().await;
    if cache.agents.is_none() {
        return;
    }

    match event {
        WatchEvent::Put { key, value } => {
            let address = key_to_address(&key);
            let updated = cache
                .agents
                .as_mut()
                .and_then(|agents| agents.get_mut(&address))
                .map(|agent| {
                    let old_job_count = agent.job_count;
                    agent.apply(&value);
                    (old_job_count, agent.job_count)
                });
            match updated {
                Some((old_job_count, new_job_count)) => {
                    info!(address = %address, old_job_count, new_job_count, "agent updated");
                }
                None => {
                    // New agent: invalidate rather than patch, a full refetch
                    // also flushes any dead entries.
                    info!(address = %address, "agent added");
                    cache.agents = None;
                }
            }
        }
        WatchEvent::Delete { key } => {
            let address = key_to_address(&key);
            info!(address = %address, "agent removed");
            if let Some(agents) = cache.agents.as_mut() {
                agents.remove(&address);
            }
        }
    }
}

#[cfg(test)]
#[path = "view_tests.rs"]
mod tests;
