// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The build request handler.
//!
//! Three phases per request: validate and stage, unpack the upload, then
//! enqueue and stream. The response is a long-lived stream of
//! newline-delimited JSON objects; it stays open after the terminal object
//! so the client can download artifacts over the same connection, and the
//! client closing the connection is the normal end of the transaction.

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bf_core::{BuildRequest, JobId};
use bf_pool::{JobHandle, WorkerPool};
use bf_registry::AgentEntry;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::fsutil;
use crate::job::{BuildJob, JobChannels};
use crate::runtime_fetch::{self, RuntimeFetcher};
use crate::server::Config;
use crate::unpack::{self, UnpackOutcome};

pub const BASE_DOWNLOAD_PATH: &str = "/v2/download/";

const BUILD_PING: &str = r#"{"status":"build in progress..."}"#;
const DOWNLOAD_PING: &str = r#"{"status":"download in progress..."}"#;
const INTERNAL_ERROR_LINE: &str = r#"{"error":"internal server error"}"#;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AgentState {
    pub config: Arc<Config>,
    pub pool: Arc<WorkerPool>,
    pub registry_entry: Arc<AgentEntry>,
    pub fetcher: Arc<dyn RuntimeFetcher>,
}

pub async fn handle_build(
    State(state): State<AgentState>,
    request: axum::extract::Request,
) -> Response {
    let (parts, body) = request.into_parts();

    // Phase 1: validate and stage.
    let raw_request = match parts
        .headers
        .get("x-build-request")
        .and_then(|value| value.to_str().ok())
        .filter(|raw| !raw.is_empty())
    {
        Some(raw) => raw.to_string(),
        None => {
            warn!("header x-build-request is not specified");
            return plain_error(StatusCode::BAD_REQUEST, "header x-build-request is not specified");
        }
    };

    let mut build_request = match BuildRequest::parse(&raw_request) {
        Ok(parsed) => parsed,
        Err(error) => {
            warn!(error = %error, "cannot parse build request");
            return plain_error(
                StatusCode::BAD_REQUEST,
                format!("cannot parse build request: {error}"),
            );
        }
    };
    build_request.sanitize();

    let job_id = JobId::generate();
    let project_dir = state.config.stage_dir.join(job_id.to_string());
    if let Err(error) = fsutil::create_private_dir(&project_dir).await {
        error!(job_id = %job_id, error = %error, "cannot create staging dir");
        return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
    }

    // Count this request against the published load right away; the router
    // must see it before the (long) upload finishes.
    publish_load(&state, 1).await;

    // Phase 2: place the runtime, then unpack the upload.
    if let Err(error) =
        runtime_fetch::prepare_runtime(state.fetcher.as_ref(), &build_request, &project_dir).await
    {
        warn!(job_id = %job_id, error = %error, "runtime preparation failed");
        cleanup(&state, &project_dir);
        return plain_error(
            StatusCode::BAD_REQUEST,
            format!("cannot prepare runtime: {error}"),
        );
    }

    match unpack::unpack_tar_zstd(
        body,
        &project_dir,
        &state.config.zstd_program,
        state.config.max_upload_bytes,
        state.config.max_upload_time,
    )
    .await
    {
        UnpackOutcome::Unpacked { elapsed } => {
            info!(
                job_id = %job_id,
                elapsed_ms = elapsed.as_millis() as u64,
                compression_level = parts
                    .headers
                    .get("x-zstd-compression-level")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or(""),
                "uploaded and unpacked"
            );
        }
        UnpackOutcome::ClientGone => {
            // Nobody is listening; clean up quietly.
            debug!(job_id = %job_id, "client disconnected during upload");
            cleanup(&state, &project_dir);
            return StatusCode::BAD_REQUEST.into_response();
        }
        UnpackOutcome::TooLarge => {
            warn!(job_id = %job_id, "upload exceeds size cap");
            cleanup(&state, &project_dir);
            return plain_error(StatusCode::PAYLOAD_TOO_LARGE, "upload is too large");
        }
        UnpackOutcome::Failed(error) => {
            error!(job_id = %job_id, error = %error, "unpack failed");
            cleanup(&state, &project_dir);
            return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
        }
    }

    // Phase 3: enqueue and stream.
    let (job, channels) = BuildJob::new(
        job_id,
        raw_request,
        project_dir.clone(),
        state.config.tmp_dir.clone(),
        state.config.node_program.clone(),
        state.config.builder_script.clone(),
    );
    job.mark_enqueued();
    let handle = match state.pool.submit(job, 0) {
        Ok(handle) => handle,
        Err(error) => {
            error!(job_id = %job_id, error = %error, "cannot enqueue job");
            cleanup(&state, &project_dir);
            return plain_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
        }
    };

    let (body_tx, body_rx) = mpsc::channel::<Result<Bytes, Infallible>>(16);
    tokio::spawn(stream_status(
        state.clone(),
        job_id,
        project_dir,
        channels,
        handle,
        body_tx,
    ));

    let stream = futures_util::stream::unfold(body_rx, |mut receiver| async move {
        receiver.recv().await.map(|item| (item, receiver))
    });
    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(stream))
    {
        Ok(response) => response,
        Err(error) => {
            error!(error = %error, "cannot build streaming response");
            plain_error(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

/// The status loop. Multiplexes client disconnect, pings, subprocess
/// output, and completion; runs until the client goes away.
async fn stream_status(
    state: AgentState,
    job_id: JobId,
    project_dir: std::path::PathBuf,
    mut channels: JobChannels,
    handle: JobHandle,
    body_tx: mpsc::Sender<Result<Bytes, Infallible>>,
) {
    let base_url = format!("{BASE_DOWNLOAD_PATH}{job_id}");
    let mut ticker = tokio::time::interval(state.config.ping_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.reset();

    let mut completed = false;
    let mut completion_pending = true;
    let mut messages_open = true;

    loop {
        tokio::select! {
            _ = body_tx.closed() => {
                info!(job_id = %job_id, "client closed connection");
                break;
            }

            _ = ticker.tick() => {
                let ping = if completed { DOWNLOAD_PING } else { BUILD_PING };
                if body_tx.send(Ok(ndjson(ping.to_string()))).await.is_err() {
                    // Keep looping; the closed() branch ends things cleanly.
                    warn!(job_id = %job_id, "cannot write ping");
                }
            }

            message = channels.messages.recv(), if messages_open => {
                match message {
                    Some(message) => {
                        let line = serde_json::json!({ "status": message }).to_string();
                        if body_tx.send(Ok(ndjson(line))).await.is_err() {
                            warn!(job_id = %job_id, "cannot write status message");
                            break;
                        }
                    }
                    None => messages_open = false,
                }
            }

            result = &mut channels.complete, if completion_pending => {
                completion_pending = false;
                let result = match result {
                    Ok(result) => result,
                    Err(_) => {
                        error!(job_id = %job_id, "job finished without a completion");
                        break;
                    }
                };
                debug!(job_id = %job_id, error = result.error.as_deref(), "complete received");

                if let Some(internal) = &result.error {
                    error!(job_id = %job_id, error = %internal, "job failed");
                    let _ = body_tx.send(Ok(ndjson(INTERNAL_ERROR_LINE.to_string()))).await;
                    break;
                }

                match result.terminal_object(&base_url) {
                    Ok(line) => {
                        if body_tx.send(Ok(ndjson(line))).await.is_err() {
                            break;
                        }
                        // Do not return: the client downloads artifacts over
                        // this connection and closes it when done.
                        completed = true;
                    }
                    Err(error) => {
                        error!(job_id = %job_id, error = %error, "cannot encode terminal object");
                        let _ = body_tx.send(Ok(ndjson(INTERNAL_ERROR_LINE.to_string()))).await;
                        break;
                    }
                }
            }
        }
    }

    if !completed {
        handle.cancel();
    }
    cleanup(&state, &project_dir);
}

/// Deferred per-request cleanup: republish the load without this request
/// and drop the staging directory, both off the request path.
fn cleanup(state: &AgentState, project_dir: &Path) {
    let state = state.clone();
    let project_dir = project_dir.to_path_buf();
    tokio::spawn(async move {
        publish_load(&state, 0).await;
        fsutil::remove_and_log(&project_dir).await;
    });
}

/// Publish queue depth + running jobs (+ this request, when it is not yet
/// in either gauge) to the registry.
async fn publish_load(state: &AgentState, relative: usize) {
    let job_count = state.pool.pending_count() + state.pool.running_count() + relative;
    state.registry_entry.update(job_count).await;
}

fn ndjson(mut line: String) -> Bytes {
    line.push('\n');
    Bytes::from(line)
}

fn plain_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, message.into()).into_response()
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
