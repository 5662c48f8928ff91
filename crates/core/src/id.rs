// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job id generation.
//!
//! Job ids name staging directories, download URLs, and registry log scopes,
//! so they must be filesystem-safe and time-ordered: a directory listing of
//! the stage dir reads in submission order. UUIDv7 gives both properties.

use std::fmt;

use uuid::Uuid;

/// Unique, time-sortable job identifier.
///
/// Rendered as the 32-char hyphen-free form so it can be embedded in paths
/// and URLs without escaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh id. Ids created later sort lexicographically after
    /// ids created earlier.
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse an id from its path/URL form.
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::try_parse(s).ok().map(Self)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_simple())
    }
}

impl serde::Serialize for JobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(&self.0.as_simple())
    }
}

impl<'de> serde::Deserialize<'de> for JobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <&str>::deserialize(deserializer)?;
        JobId::parse(s).ok_or_else(|| serde::de::Error::custom(format!("invalid job id: {s:?}")))
    }
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
