// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide tracing setup shared by the agent and router binaries.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `encoding` is `console` or `json`;
/// `RUST_LOG` overrides the default `info` filter. Safe to call twice
/// (later calls are ignored), which keeps tests simple.
pub fn init(encoding: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if encoding == "json" {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    }
}
