// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent startup, routes, and graceful shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use bf_core::Disposer;
use bf_pool::{default_worker_count, WorkerPool, DEFAULT_JOB_MAX_TIME};
use bf_registry::{
    AgentEntry, EtcdConnector, MemConnector, MemStore, StoreConnector, StoreError, BUILDERS_PREFIX,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::env::{self, EnvError};
use crate::handler::AgentState;
use crate::runtime_fetch::DisabledFetcher;
use crate::{download, fsutil, handler};

const TLS_CERT_PATH: &str = "/etc/secrets/tls.cert";
const TLS_KEY_PATH: &str = "/etc/secrets/tls.key";

/// How long finished-but-draining workers get before a hard abort.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub stage_dir: PathBuf,
    pub tmp_dir: PathBuf,
    pub node_program: String,
    pub builder_script: PathBuf,
    pub zstd_program: String,
    pub max_upload_bytes: u64,
    pub max_upload_time: Duration,
    pub job_max_time: Duration,
    pub worker_count: usize,
    pub ping_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self, EnvError> {
        Ok(Self {
            port: env::builder_port(),
            stage_dir: PathBuf::from("/stage"),
            tmp_dir: env::builder_tmp_dir()?,
            node_program: "node".to_string(),
            builder_script: env::node_modules_dir()
                .join("electron-builder-lib/out/remoteBuilder/builder-cli.js"),
            zstd_program: "zstd".to_string(),
            max_upload_bytes: 768 * 1024 * 1024,
            max_upload_time: Duration::from_secs(10 * 60),
            job_max_time: DEFAULT_JOB_MAX_TIME,
            worker_count: default_worker_count(),
            ping_interval: Duration::from_secs(20),
        })
    }
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("registry error: {0}")]
    Store(#[from] StoreError),

    #[error("cannot get external public ip - status: {status}, response: {body}")]
    PublicIp { status: u16, body: String },

    #[error("public ip lookup failed: {0}")]
    IpLookup(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// All agent routes. Rate limiting (1 r/s burst 10 for builds, 10 r/s
/// burst 100 for downloads) and TLS termination live in the fronting layer.
pub fn router(state: AgentState) -> Router {
    Router::new()
        .route("/v2/build", post(handler::handle_build))
        .route("/v2/download/:job_id/*file", get(download::handle_download))
        .route("/health-check", get(health_check))
        .with_state(state)
}

async fn health_check() -> StatusCode {
    StatusCode::OK
}

pub async fn serve(config: Config) -> Result<(), ServeError> {
    let config = Arc::new(config);
    fsutil::ensure_empty_dir(&config.stage_dir).await?;
    fsutil::ensure_empty_dir(&config.tmp_dir).await?;

    let shutdown = CancellationToken::new();
    let pool =
        Arc::new(WorkerPool::new(config.worker_count, config.job_max_time, shutdown.clone()));

    let connector: Arc<dyn StoreConnector> = if env::use_embedded_store() {
        info!("using embedded in-process coordination store");
        Arc::new(MemConnector::new(MemStore::new()))
    } else {
        Arc::new(EtcdConnector::new(env::etcd_endpoint()))
    };

    let agent_key = agent_key(config.port).await?;
    let registry_entry =
        Arc::new(AgentEntry::register(connector, format!("{BUILDERS_PREFIX}{agent_key}")).await?);

    let disposer = Arc::new(Disposer::new());
    {
        let registry_entry = Arc::clone(&registry_entry);
        disposer.add(move || async move { registry_entry.close().await });
    }

    let state = AgentState {
        config: Arc::clone(&config),
        pool: Arc::clone(&pool),
        registry_entry,
        fetcher: Arc::new(DisabledFetcher),
    };

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    if env::use_ssl() {
        info!(cert = TLS_CERT_PATH, key = TLS_KEY_PATH, "TLS terminated by the fronting layer");
    }
    info!(
        port = config.port,
        stage_dir = %config.stage_dir.display(),
        tmp_dir = %config.tmp_dir.display(),
        key = %agent_key,
        "started"
    );

    let graceful = {
        let disposer = Arc::clone(&disposer);
        async move {
            shutdown_signal().await;
            info!("shutdown requested");
            // The registry entry goes first: the router must stop sending
            // work here before the listener stops accepting.
            disposer.dispose().await;
        }
    };
    axum::serve(listener, router(state)).with_graceful_shutdown(graceful).await?;

    pool.close();
    tokio::select! {
        _ = pool.done() => {}
        _ = tokio::time::sleep(DRAIN_TIMEOUT) => {
            info!("drain timeout, aborting running jobs");
            shutdown.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(5), pool.done()).await;
        }
    }
    info!("stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "cannot install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// `<host>:<port>` under which this agent registers itself.
async fn agent_key(port: u16) -> Result<String, ServeError> {
    let host = match env::builder_host() {
        Some(host) => host,
        None => external_public_ip().await?,
    };
    Ok(format!("{host}:{port}"))
}

async fn external_public_ip() -> Result<String, ServeError> {
    let url = env::public_ip_lookup_url();
    debug!(url = %url, "get external ip");
    let response = reqwest::get(&url).await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ServeError::PublicIp { status: status.as_u16(), body });
    }
    Ok(body.trim().to_string())
}
