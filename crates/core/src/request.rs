// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build request types, parsed from the `x-build-request` header.

use serde::{Deserialize, Serialize};

/// A single packaging target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    pub arch: String,
    #[serde(rename = "unpackedDirName", default)]
    pub unpacked_dir_name: String,
}

/// Electron runtime download spec.
///
/// The `mirror`, `cache`, and `custom_dir` fields are client-controlled paths
/// and must never reach the downloader; [`BuildRequest::sanitize`] clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectronDownload {
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
    #[serde(rename = "customDir", default, skip_serializing_if = "Option::is_none")]
    pub custom_dir: Option<String>,
}

impl ElectronDownload {
    /// True when there is nothing to fetch (no version requested).
    pub fn is_empty(&self) -> bool {
        self.version.is_empty()
    }
}

/// Parsed `x-build-request` header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
    #[serde(default)]
    pub platform: String,
    #[serde(rename = "executableName", default, skip_serializing_if = "Option::is_none")]
    pub executable_name: Option<String>,
    #[serde(rename = "electronDownload", default, skip_serializing_if = "Option::is_none")]
    pub electron_download: Option<ElectronDownload>,
}

impl BuildRequest {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Clear client-controlled download locations.
    ///
    /// Must run before the request is handed to any downloader or echoed into
    /// a subprocess argument.
    pub fn sanitize(&mut self) {
        if let Some(download) = self.electron_download.as_mut() {
            download.mirror = None;
            download.cache = None;
            download.custom_dir = None;
        }
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
