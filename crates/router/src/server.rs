// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Router HTTP surface.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bf_registry::{AgentRegistry, EtcdConnector, StoreConnector, StoreError};
use thiserror::Error;
use tracing::{error, info};

use crate::select::{select_agent, SelectError};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("registry error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Listen port (default `443`).
pub fn router_port() -> u16 {
    std::env::var("ROUTER_PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(443)
}

/// Coordination store endpoint, same default as the agent.
fn etcd_endpoint() -> String {
    let endpoint = std::env::var("ETCD_ENDPOINT").unwrap_or_default();
    if endpoint.is_empty() {
        "http://etcd-cluster-client:2379".to_string()
    } else {
        endpoint
    }
}

/// Router routes. Rate limiting (1 r/s, burst 10) lives in the fronting
/// layer.
pub fn router(registry: Arc<AgentRegistry>) -> Router {
    Router::new().route("/find-build-agent", get(find_build_agent)).with_state(registry)
}

async fn find_build_agent(State(registry): State<Arc<AgentRegistry>>) -> Response {
    let agents = match registry.agents().await {
        Ok(agents) => agents,
        Err(e) => {
            error!(error = %e, "cannot get agents");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    match select_agent(&agents) {
        Ok(agent) => {
            let body = format!(r#"{{"endpoint": "https://{}"}}"#, agent.address);
            ([(header::CONTENT_TYPE, "application/json; charset=utf-8")], body).into_response()
        }
        Err(reason @ (SelectError::NoAgents | SelectError::Overloaded)) => {
            error!("{reason}");
            (StatusCode::SERVICE_UNAVAILABLE, reason.to_string()).into_response()
        }
    }
}

pub async fn serve() -> Result<(), RouterError> {
    let store = EtcdConnector::new(etcd_endpoint()).connect().await?;
    let registry = Arc::new(AgentRegistry::new(store));
    registry.listen().await?;

    let port = router_port();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "started");
    axum::serve(listener, router(registry)).await?;
    info!("stopped");
    Ok(())
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
