// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use bf_registry::{LeaseStore, MemStore};
use tower::ServiceExt;

use super::*;

async fn put_agent(store: &MemStore, address: &str, cpu: u8, jobs: u8) {
    let lease = store.grant(Duration::from_secs(60)).await.unwrap();
    store.put(&format!("/builders/{address}"), vec![cpu, jobs], lease).await.unwrap();
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn returns_least_loaded_endpoint() {
    let store = MemStore::new();
    put_agent(&store, "10.0.0.1:443", 8, 4).await;
    put_agent(&store, "10.0.0.2:443", 4, 1).await;

    let app = router(Arc::new(AgentRegistry::new(Arc::new(store))));
    let response =
        app.oneshot(Request::get("/find-build-agent").body(Body::empty()).unwrap()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, r#"{"endpoint": "https://10.0.0.2:443"}"#);
}

#[tokio::test]
async fn no_agents_is_503() {
    let app = router(Arc::new(AgentRegistry::new(Arc::new(MemStore::new()))));
    let response =
        app.oneshot(Request::get("/find-build-agent").body(Body::empty()).unwrap()).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(response).await, "no running build agents");
}

#[tokio::test]
async fn overloaded_agent_is_503() {
    let store = MemStore::new();
    put_agent(&store, "10.0.0.1:443", 8, 17).await;

    let app = router(Arc::new(AgentRegistry::new(Arc::new(store))));
    let response =
        app.oneshot(Request::get("/find-build-agent").body(Body::empty()).unwrap()).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(response).await, "all build agents are overloaded");
}
