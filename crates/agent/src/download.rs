// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Artifact download route.
//!
//! Serves files out of `<stage>/<job>/out/` with byte-range support. The
//! client keeps its build connection open while fetching these, often with
//! several parallel range requests.

use std::path::{Component, Path, PathBuf};

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bf_core::JobId;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::handler::AgentState;
use crate::job::OUT_DIR_NAME;

/// Resolve a download request to a path inside the job's out-dir.
/// `None` for unknown ids and for paths that would escape it.
fn artifact_path(stage_dir: &Path, job_id: &str, file: &str) -> Option<PathBuf> {
    let job_id = JobId::parse(job_id)?;
    let relative = Path::new(file);
    let contained = !file.is_empty()
        && relative.is_relative()
        && relative.components().all(|c| matches!(c, Component::Normal(_)));
    if !contained {
        return None;
    }
    Some(stage_dir.join(job_id.to_string()).join(OUT_DIR_NAME).join(relative))
}

pub async fn handle_download(
    State(state): State<AgentState>,
    UrlPath((job_id, file)): UrlPath<(String, String)>,
    request: axum::extract::Request,
) -> Response {
    let Some(path) = artifact_path(&state.config.stage_dir, &job_id, &file) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[cfg(test)]
#[path = "download_tests.rs"]
mod tests;
