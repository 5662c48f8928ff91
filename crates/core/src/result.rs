// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build result payload and the terminal response object.
//!
//! The packaging tool reports through an opaque manifest: a JSON array of
//! artifact descriptors on success, a JSON object on structured failure, or a
//! plain string otherwise. The first byte is the discriminator.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// One artifact record from a success manifest. Only the path is read here;
/// the rest of the descriptor passes through to the client untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactFile {
    pub file: String,
}

/// How the raw manifest is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    /// `[` — array of artifact descriptors.
    Files,
    /// `{` — structured failure object.
    StructuredError,
    /// Anything else (including empty) — plain error text.
    PlainError,
}

/// Outcome of one build job.
///
/// `error` is an internal failure (subprocess crash, I/O, panic, cancellation)
/// and never reaches the client verbatim; `raw_result` is whatever the
/// packaging tool wrote, forwarded in the terminal object.
#[derive(Debug, Default)]
pub struct BuildResult {
    pub error: Option<String>,
    pub raw_result: String,
    pub file_sizes: Vec<i64>,
}

#[derive(Serialize)]
struct TerminalObject<'a> {
    #[serde(rename = "baseUrl")]
    base_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<&'a RawValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a RawValue>,
    #[serde(rename = "fileSizes", skip_serializing_if = "Option::is_none")]
    file_sizes: Option<&'a [i64]>,
}

impl BuildResult {
    pub fn internal(error: impl std::fmt::Display) -> Self {
        Self { error: Some(error.to_string()), ..Self::default() }
    }

    pub fn kind(&self) -> ResultKind {
        match self.raw_result.as_bytes().first() {
            Some(b'[') => ResultKind::Files,
            Some(b'{') => ResultKind::StructuredError,
            _ => ResultKind::PlainError,
        }
    }

    /// Render the terminal response object.
    ///
    /// Raw manifest bytes are re-emitted verbatim for `[`/`{` manifests
    /// (validated, not re-encoded); a plain manifest becomes a JSON string.
    pub fn terminal_object(&self, base_url: &str) -> Result<String, serde_json::Error> {
        let raw: Box<RawValue> = match self.kind() {
            ResultKind::Files | ResultKind::StructuredError => {
                RawValue::from_string(self.raw_result.clone())?
            }
            ResultKind::PlainError => serde_json::value::to_raw_value(&self.raw_result)?,
        };

        let object = TerminalObject {
            base_url,
            files: (self.kind() == ResultKind::Files).then_some(&*raw),
            error: (self.kind() != ResultKind::Files).then_some(&*raw),
            file_sizes: (!self.file_sizes.is_empty()).then_some(self.file_sizes.as_slice()),
        };
        serde_json::to_string(&object)
    }
}

#[cfg(test)]
#[path = "result_tests.rs"]
mod tests;
