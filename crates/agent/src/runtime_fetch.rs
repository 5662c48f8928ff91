// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Electron runtime placement.
//!
//! The actual downloader is an external collaborator behind
//! [`RuntimeFetcher`]; this module owns the in-scope parts: sanitized specs
//! only, a validated unpack destination inside the staging dir, and the
//! executable rename.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bf_core::{BuildRequest, ElectronDownload};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no runtime downloader configured")]
    Unavailable,

    #[error("build request has no targets")]
    NoTarget,

    #[error("invalid unpacked dir name: {0:?}")]
    BadUnpackDir(String),

    #[error("invalid executable name: {0:?}")]
    BadExecutableName(String),

    #[error("runtime download failed: {0}")]
    Download(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fetches and unpacks an Electron runtime into a destination directory.
#[async_trait]
pub trait RuntimeFetcher: Send + Sync {
    async fn fetch(&self, spec: &ElectronDownload, dest: &Path) -> Result<(), FetchError>;
}

/// Default fetcher for deployments whose clients bundle the runtime into
/// the upload instead.
pub struct DisabledFetcher;

#[async_trait]
impl RuntimeFetcher for DisabledFetcher {
    async fn fetch(&self, _spec: &ElectronDownload, _dest: &Path) -> Result<(), FetchError> {
        Err(FetchError::Unavailable)
    }
}

/// A relative path that stays inside its parent.
fn checked_subdir(parent: &Path, name: &str) -> Result<PathBuf, FetchError> {
    let relative = Path::new(name);
    let plain = !name.is_empty()
        && relative.is_relative()
        && relative.components().all(|c| matches!(c, Component::Normal(_)));
    if !plain {
        return Err(FetchError::BadUnpackDir(name.to_string()));
    }
    Ok(parent.join(relative))
}

/// Place the runtime for `request` into the staging dir, if it asks for one.
///
/// An empty version means the client did not request a runtime; nothing to
/// do. The download spec must already be sanitized.
pub async fn prepare_runtime(
    fetcher: &dyn RuntimeFetcher,
    request: &BuildRequest,
    project_dir: &Path,
) -> Result<(), FetchError> {
    let Some(download) = request.electron_download.as_ref() else {
        return Ok(());
    };
    if download.is_empty() {
        return Ok(());
    }

    let target = request.targets.first().ok_or(FetchError::NoTarget)?;
    let dest = checked_subdir(project_dir, &target.unpacked_dir_name)?;

    info!(version = %download.version, dest = %dest.display(), "fetching runtime");
    fetcher.fetch(download, &dest).await?;

    if let Some(name) = request.executable_name.as_deref() {
        rename_executable(&dest, name).await?;
    }
    Ok(())
}

/// Rename the unpacked `electron` binary to the product name.
async fn rename_executable(dest: &Path, name: &str) -> Result<(), FetchError> {
    if name.is_empty() || name.contains('/') || name.contains('\\') {
        return Err(FetchError::BadExecutableName(name.to_string()));
    }
    tokio::fs::rename(dest.join("electron"), dest.join(name)).await?;
    Ok(())
}

#[cfg(test)]
#[path = "runtime_fetch_tests.rs"]
mod tests;
