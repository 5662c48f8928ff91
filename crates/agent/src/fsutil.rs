// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem helpers shared by the job engine and server startup.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

/// Create a directory with mode 0700. The parent must exist.
pub async fn create_private_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut builder = std::fs::DirBuilder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&path)
    })
    .await
    .map_err(io::Error::other)?
}

/// Make sure `path` exists and contains nothing.
pub async fn ensure_empty_dir(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(error),
    }
    tokio::fs::create_dir_all(path).await
}

/// Best-effort recursive removal; failures are logged, not surfaced.
pub async fn remove_and_log(path: &Path) {
    debug!(file = %path.display(), "remove");
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => error!(file = %path.display(), error = %error, "cannot remove"),
    }
}

/// Remove every child of `dir` except `keep`.
pub async fn remove_children_except(dir: &Path, keep: &str) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) => {
            error!(dir = %dir.display(), error = %error, "cannot list for cleanup");
            return;
        }
    };
    let mut to_remove: Vec<PathBuf> = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name() != keep {
            to_remove.push(entry.path());
        }
    }
    for path in to_remove {
        if path.is_dir() {
            remove_and_log(&path).await;
        } else if let Err(error) = tokio::fs::remove_file(&path).await {
            error!(file = %path.display(), error = %error, "cannot remove");
        }
    }
}

#[cfg(test)]
#[path = "fsutil_tests.rs"]
mod tests;
