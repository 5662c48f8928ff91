// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Router daemon entrypoint.

use tracing::error;

#[tokio::main]
async fn main() {
    let encoding = std::env::var("LOG_ENCODING").unwrap_or_else(|_| "console".to_string());
    bf_core::logging::init(&encoding);

    if let Err(e) = bf_router::serve().await {
        error!(error = %e, "cannot start");
        std::process::exit(1);
    }
}
