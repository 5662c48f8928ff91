// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::future::Future;
use std::time::Duration;

use super::*;
use crate::store::{LeaseId, MemStore};

async fn put_agent(store: &MemStore, address: &str, cpu: u8, jobs: u8) -> LeaseId {
    let lease = store.grant(Duration::from_secs(60)).await.unwrap();
    store
        .put(&format!("{BUILDERS_PREFIX}{address}"), vec![cpu, jobs], lease)
        .await
        .unwrap();
    lease
}

async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn fetches_and_maps_by_last_path_segment() {
    let store = MemStore::new();
    put_agent(&store, "10.0.0.1:443", 8, 4).await;
    put_agent(&store, "10.0.0.2:443", 4, 1).await;

    let registry = AgentRegistry::new(Arc::new(store));
    let agents = registry.agents().await.unwrap();

    assert_eq!(agents.len(), 2);
    let first = &agents["10.0.0.1:443"];
    assert_eq!(first.address, "10.0.0.1:443");
    assert_eq!(first.cpu_count, 8);
    assert_eq!(first.job_count, 4);
}

#[tokio::test]
async fn second_query_is_served_from_cache() {
    let store = MemStore::new();
    let lease = put_agent(&store, "10.0.0.1:443", 8, 4).await;

    let registry = AgentRegistry::new(Arc::new(store.clone()));
    assert_eq!(registry.agents().await.unwrap().len(), 1);

    // No watch task is running, so a store change must not be visible
    // while the snapshot is fresh.
    store.put("/builders/10.0.0.1:443", vec![8, 9], lease).await.unwrap();
    assert_eq!(registry.agents().await.unwrap()["10.0.0.1:443"].job_count, 4);
}

#[tokio::test]
async fn skips_malformed_entries() {
    let store = MemStore::new();
    let lease = store.grant(Duration::from_secs(60)).await.unwrap();
    store.put("/builders/bad:443", vec![7], lease).await.unwrap();
    put_agent(&store, "10.0.0.1:443", 8, 4).await;

    let registry = AgentRegistry::new(Arc::new(store));
    let agents = registry.agents().await.unwrap();
    assert_eq!(agents.len(), 1);
    assert!(agents.contains_key("10.0.0.1:443"));
}

#[tokio::test]
async fn watch_updates_known_agent_in_place() {
    let store = MemStore::new();
    let lease = put_agent(&store, "10.0.0.1:443", 8, 4).await;

    let registry = AgentRegistry::new(Arc::new(store.clone()));
    registry.listen().await.unwrap();
    assert_eq!(registry.agents().await.unwrap()["10.0.0.1:443"].job_count, 4);

    store.put("/builders/10.0.0.1:443", vec![8, 9], lease).await.unwrap();
    wait_for("job count update", || async {
        registry.cached().await.map(|agents| agents["10.0.0.1:443"].job_count) == Some(9)
    })
    .await;
}

#[tokio::test]
async fn watch_invalidates_on_new_agent() {
    let store = MemStore::new();
    put_agent(&store, "10.0.0.1:443", 8, 4).await;

    let registry = AgentRegistry::new(Arc::new(store.clone()));
    registry.listen().await.unwrap();
    assert_eq!(registry.agents().await.unwrap().len(), 1);

    put_agent(&store, "10.0.0.2:443", 4, 1).await;
    wait_for("cache invalidation", || async { registry.cached().await.is_none() }).await;

    // Next query refetches and sees both.
    assert_eq!(registry.agents().await.unwrap().len(), 2);
}

#[tokio::test]
async fn watch_removes_deleted_agent_in_place() {
    let store = MemStore::new();
    let lease_one = put_agent(&store, "10.0.0.1:443", 8, 4).await;
    put_agent(&store, "10.0.0.2:443", 4, 1).await;

    let registry = AgentRegistry::new(Arc::new(store.clone()));
    registry.listen().await.unwrap();
    assert_eq!(registry.agents().await.unwrap().len(), 2);

    store.revoke(lease_one).await.unwrap();
    wait_for("agent removal", || async {
        registry.cached().await.map(|agents| agents.len()) == Some(1)
    })
    .await;
    assert!(registry.cached().await.unwrap().contains_key("10.0.0.2:443"));
}
