// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upload decompression.
//!
//! The request body is a zstd-compressed tar of the project tree, streamed
//! straight into an external `tar --use-compress-program=<zstd>` child with
//! the staging directory as its working directory. The body is capped and
//! the whole phase carries a deadline.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use axum::body::Body;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Debug, Error)]
pub enum UnpackError {
    #[error("cannot start decompressor: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("decompressor failed (exit status {status:?}): {stderr}")]
    Tar { status: Option<i32>, stderr: String },

    #[error("upload deadline exceeded")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// How an upload ended.
#[derive(Debug)]
pub enum UnpackOutcome {
    /// Project tree extracted into the staging dir.
    Unpacked { elapsed: Duration },
    /// The client went away mid-upload; not an error worth surfacing.
    ClientGone,
    /// Body exceeded the configured cap.
    TooLarge,
    Failed(UnpackError),
}

enum FeedEnd {
    Complete,
    ClientGone,
    TooLarge,
    /// tar closed its stdin early; its exit status tells the story.
    ChildClosed,
}

/// Stream `body` as stdin to `tar -x` in `unpack_dir`.
pub async fn unpack_tar_zstd(
    body: Body,
    unpack_dir: &Path,
    zstd_program: &str,
    max_bytes: u64,
    max_time: Duration,
) -> UnpackOutcome {
    let start = Instant::now();

    let mut command = tokio::process::Command::new("tar");
    command
        .arg(format!("--use-compress-program={zstd_program}"))
        .arg("-x")
        .current_dir(unpack_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(error) => return UnpackOutcome::Failed(UnpackError::Spawn(error)),
    };

    let mut stdin = child.stdin.take();
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut output = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = tokio::io::copy(&mut stderr, &mut output).await;
        }
        String::from_utf8_lossy(&output).into_owned()
    });

    let fed = tokio::time::timeout(max_time, async {
        let mut received: u64 = 0;
        let mut stream = body.into_data_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                // A body read error here means the client disconnected.
                Err(_) => return FeedEnd::ClientGone,
            };
            received += chunk.len() as u64;
            if received > max_bytes {
                return FeedEnd::TooLarge;
            }
            if let Some(writer) = stdin.as_mut() {
                if writer.write_all(&chunk).await.is_err() {
                    return FeedEnd::ChildClosed;
                }
            }
        }
        // Closing stdin lets tar see EOF and finish.
        drop(stdin.take());
        FeedEnd::Complete
    })
    .await;

    let end = match fed {
        Ok(end) => end,
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return UnpackOutcome::Failed(UnpackError::Timeout);
        }
    };
    drop(stdin);

    match end {
        FeedEnd::ClientGone => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            debug!("client disconnected during upload");
            UnpackOutcome::ClientGone
        }
        FeedEnd::TooLarge => {
            let _ = child.start_kill();
            let _ = child.wait().await;
            UnpackOutcome::TooLarge
        }
        FeedEnd::Complete | FeedEnd::ChildClosed => {
            let status = match tokio::time::timeout(max_time, child.wait()).await {
                Ok(Ok(status)) => status,
                Ok(Err(error)) => return UnpackOutcome::Failed(UnpackError::Io(error)),
                Err(_) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return UnpackOutcome::Failed(UnpackError::Timeout);
                }
            };
            let stderr = stderr_task.await.unwrap_or_default();
            if status.success() {
                UnpackOutcome::Unpacked { elapsed: start.elapsed() }
            } else {
                UnpackOutcome::Failed(UnpackError::Tar { status: status.code(), stderr })
            }
        }
    }
}

#[cfg(test)]
#[path = "unpack_tests.rs"]
mod tests;
