// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One packaging job: subprocess, status streaming, result manifest.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bf_core::{map_concurrent, ArtifactFile, BuildResult, JobId, ResultKind};
use bf_pool::PoolJob;
use futures_util::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument, Span};

use crate::fsutil;

/// Artifacts land here inside the staging directory; everything else is
/// removed once the build finishes while the client is still downloading.
pub const OUT_DIR_NAME: &str = "out";

/// The packaging tool writes its result here, inside the job temp dir.
/// Stdout is unusable for this: the tool logs freely on both pipes.
const RESULT_MANIFEST: &str = "__build-result.json";

/// Status-message backlog tolerated before the subprocess reader blocks.
const MESSAGE_BUFFER: usize = 16;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("cannot start packaging tool: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("job cancelled")]
    Cancelled,

    #[error("cannot read build result (exit status {status:?}): {source}")]
    Manifest {
        status: Option<i32>,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed artifact list in build result: {0}")]
    BadManifest(#[source] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Receiving side of a job's channels, owned by the request handler.
pub struct JobChannels {
    pub messages: mpsc::Receiver<String>,
    pub complete: oneshot::Receiver<BuildResult>,
}

/// In-memory record of a packaging request.
///
/// Carries only the narrow dependencies the subprocess needs (paths and
/// program names); the handler that created it is not referenced.
pub struct BuildJob {
    id: JobId,
    raw_request: String,
    project_dir: PathBuf,
    tmp_root: PathBuf,
    node_program: String,
    builder_script: PathBuf,
    queue_add_time: Mutex<Option<Instant>>,
    messages: mpsc::Sender<String>,
    complete: Mutex<Option<oneshot::Sender<BuildResult>>>,
    span: Span,
}

impl BuildJob {
    pub fn new(
        id: JobId,
        raw_request: String,
        project_dir: PathBuf,
        tmp_root: PathBuf,
        node_program: String,
        builder_script: PathBuf,
    ) -> (Arc<Self>, JobChannels) {
        let (message_tx, message_rx) = mpsc::channel(MESSAGE_BUFFER);
        let (complete_tx, complete_rx) = oneshot::channel();
        let job = Arc::new(Self {
            span: info_span!("job", job_id = %id),
            id,
            raw_request,
            project_dir,
            tmp_root,
            node_program,
            builder_script,
            queue_add_time: Mutex::new(None),
            messages: message_tx,
            complete: Mutex::new(Some(complete_tx)),
        });
        (job, JobChannels { messages: message_rx, complete: complete_rx })
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Stamp the moment the job enters the queue, for the wait-time report.
    pub fn mark_enqueued(&self) {
        *self.queue_add_time.lock() = Some(Instant::now());
    }

    /// Single-slot completion: the sender is consumed on first use, so a
    /// second delivery (e.g. from panic recovery racing the happy path) is
    /// structurally impossible and the send never blocks the worker.
    fn deliver(&self, result: BuildResult) {
        if let Some(sender) = self.complete.lock().take() {
            // The handler may be gone after a disconnect; that is fine.
            let _ = sender.send(result);
        }
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<BuildResult, JobError> {
        let project_tmp_dir = self.tmp_root.join(self.id.to_string());
        fsutil::create_private_dir(&project_tmp_dir).await?;

        let project_out_dir = self.project_dir.join(OUT_DIR_NAME);
        fsutil::ensure_empty_dir(&project_out_dir).await?;

        let mut command = tokio::process::Command::new(&self.node_program);
        command
            .arg(&self.builder_script)
            .arg(&self.raw_request)
            .current_dir(&self.project_dir)
            .env("PROJECT_DIR", &self.project_dir)
            .env("PROJECT_OUT_DIR", &project_out_dir)
            .env("APP_BUILDER_TMP_DIR", &project_tmp_dir)
            // The agent removes the temp dir itself; no need to spend the
            // tool's time on it.
            .env("TMP_DIR_MANAGER_ENSURE_REMOVED_ON_EXIT", "false")
            .env("FORCE_COLOR", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(JobError::Spawn)?;

        let (line_tx, line_rx) = mpsc::channel(64);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_lines(stderr, line_tx.clone()));
        }
        drop(line_tx);
        let pump = tokio::spawn(pump_lines(line_rx, self.messages.clone()));

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                // Orphaned grandchildren may keep the output pipes open;
                // do not wait for EOF that may never come.
                pump.abort();
                return Err(JobError::Cancelled);
            }
            status = child.wait() => status?,
        };
        // All output is flushed into the status channel before the result.
        let _ = pump.await;

        let raw_result = tokio::fs::read_to_string(project_tmp_dir.join(RESULT_MANIFEST))
            .await
            .map_err(|source| JobError::Manifest { status: status.code(), source })?;

        let mut result = BuildResult { raw_result, ..BuildResult::default() };
        if result.kind() == ResultKind::Files {
            let files: Vec<ArtifactFile> =
                serde_json::from_str(&result.raw_result).map_err(JobError::BadManifest)?;
            result.file_sizes = compute_file_sizes(&files, &project_out_dir).await?;
        }

        Ok(result)
    }

    /// Temp dir goes away entirely; the staging dir keeps only `out/`,
    /// which the client is still downloading from.
    fn spawn_cleanup(&self) {
        let project_tmp_dir = self.tmp_root.join(self.id.to_string());
        let project_dir = self.project_dir.clone();
        tokio::spawn(async move {
            fsutil::remove_and_log(&project_tmp_dir).await;
            fsutil::remove_children_except(&project_dir, OUT_DIR_NAME).await;
        });
    }
}

#[async_trait]
impl PoolJob for BuildJob {
    fn describe(&self) -> String {
        self.id.to_string()
    }

    async fn run(&self, cancel: CancellationToken) {
        let span = self.span.clone();
        async move {
            let wait_time = self
                .queue_add_time
                .lock()
                .as_ref()
                .map(|added| added.elapsed())
                .unwrap_or_default();
            info!(wait_ms = wait_time.as_millis() as u64, "job started");
            let _ = self
                .messages
                .send(format!(
                    "job started (queue time: {:?})",
                    Duration::from_millis(wait_time.as_millis() as u64)
                ))
                .await;

            let started = Instant::now();
            let outcome =
                std::panic::AssertUnwindSafe(self.execute(&cancel)).catch_unwind().await;
            let result = match outcome {
                Ok(Ok(result)) => {
                    info!(
                        duration_ms = started.elapsed().as_millis() as u64,
                        result = %result.raw_result,
                        "job completed"
                    );
                    result
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!(duration_ms = started.elapsed().as_millis() as u64, "job cancelled");
                    BuildResult::internal(JobError::Cancelled)
                }
                Ok(Err(job_error)) => {
                    error!(error = %job_error, "job failed");
                    BuildResult::internal(job_error)
                }
                Err(_) => {
                    error!("job panicked");
                    BuildResult::internal("panic in build job")
                }
            };

            self.deliver(result);
            self.spawn_cleanup();
        }
        .instrument(span)
        .await
    }
}

async fn read_lines<R>(reader: R, lines: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        if lines.send(line).await.is_err() {
            return;
        }
    }
}

/// Forward subprocess output to the status channel, coalescing lines that
/// arrived while the previous send was in flight. Multi-line diagnostics
/// stay together without flooding the channel.
async fn pump_lines(mut lines: mpsc::Receiver<String>, messages: mpsc::Sender<String>) {
    while let Some(first) = lines.recv().await {
        let mut chunk = first;
        while let Ok(next) = lines.try_recv() {
            chunk.push('\n');
            chunk.push_str(&next);
        }
        if messages.send(chunk).await.is_err() {
            return;
        }
    }
}

/// Artifact sizes, fetched concurrently but bounded.
async fn compute_file_sizes(
    files: &[ArtifactFile],
    project_out_dir: &Path,
) -> Result<Vec<i64>, JobError> {
    let sizes = Arc::new(Mutex::new(vec![0i64; files.len()]));
    let paths: Vec<PathBuf> = files.iter().map(|f| project_out_dir.join(&f.file)).collect();

    let collected = Arc::clone(&sizes);
    map_concurrent(paths.len(), bf_pool::default_worker_count(), move |index| {
        let path = paths[index].clone();
        let sizes = Arc::clone(&collected);
        async move {
            let metadata = tokio::fs::metadata(&path).await?;
            sizes.lock()[index] = metadata.len() as i64;
            Ok::<(), JobError>(())
        }
    })
    .await?;

    let sizes = std::mem::take(&mut *sizes.lock());
    Ok(sizes)
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
