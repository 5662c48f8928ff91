// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the agent.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{dir} cannot be used as APP_BUILDER_TMP_DIR because this dir will be emptied")]
    UnsafeTmpDir { dir: String },
}

/// Listen port (default `443`).
pub fn builder_port() -> u16 {
    std::env::var("BUILDER_PORT").ok().and_then(|s| s.parse().ok()).unwrap_or(443)
}

/// Explicit external address; when set, the public-IP lookup is skipped.
pub fn builder_host() -> Option<String> {
    std::env::var("BUILDER_HOST").ok().filter(|s| !s.is_empty())
}

/// Preferred IP version for the public-IP lookup (`4` or `6`).
pub fn preferred_ip_version() -> Option<char> {
    std::env::var("PREFERRED_IP_VERSION")
        .ok()
        .filter(|s| s.len() == 1)
        .and_then(|s| s.chars().next())
}

/// URL of the external-IP service, honoring the preferred IP version.
pub fn public_ip_lookup_url() -> String {
    match preferred_ip_version() {
        Some(version) => format!("https://ipv{version}.myexternalip.com/raw"),
        None => "https://myexternalip.com/raw".to_string(),
    }
}

/// Scratch root handed to the packaging tool. The default sits outside every
/// managed tree; an explicit override must not point at a directory whose
/// removal would be destructive, because the agent empties it on startup.
pub fn builder_tmp_dir() -> Result<PathBuf, EnvError> {
    let configured = std::env::var("APP_BUILDER_TMP_DIR").unwrap_or_default();
    if configured.is_empty() {
        return Ok(PathBuf::from("/builder-tmp"));
    }

    let dir = PathBuf::from(&configured);
    if dir == Path::new("/") || dir == std::env::temp_dir() {
        return Err(EnvError::UnsafeTmpDir { dir: configured });
    }
    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() && Path::new(&home).starts_with(&dir) {
            return Err(EnvError::UnsafeTmpDir { dir: configured });
        }
    }
    Ok(dir)
}

/// Coordination store endpoint. The default is the service-discovery name
/// the etcd operator publishes inside the cluster.
pub fn etcd_endpoint() -> String {
    let endpoint = std::env::var("ETCD_ENDPOINT").unwrap_or_default();
    if endpoint.is_empty() {
        "http://etcd-cluster-client:2379".to_string()
    } else {
        endpoint
    }
}

/// Truthy → run against the in-process store instead of etcd.
pub fn use_embedded_store() -> bool {
    truthy(&std::env::var("USE_EMBEDDED_ETCD").unwrap_or_default())
}

/// `false` disables TLS; anything else means the fronting layer terminates
/// TLS with the mounted cert/key pair.
pub fn use_ssl() -> bool {
    !matches!(std::env::var("USE_SSL").as_deref(), Ok("false"))
}

/// Log encoding: `console` (default) or `json`.
pub fn log_encoding() -> String {
    std::env::var("LOG_ENCODING").unwrap_or_else(|_| "console".to_string())
}

/// Root of the node_modules tree holding the packaging tool.
pub fn node_modules_dir() -> PathBuf {
    std::env::var("BUILDER_NODE_MODULES")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/node_modules"))
}

fn truthy(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
