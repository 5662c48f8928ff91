// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build agent daemon entrypoint.

use tracing::error;

#[tokio::main]
async fn main() {
    bf_core::logging::init(&bf_agent::env::log_encoding());

    let config = match bf_agent::Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "cannot start");
            std::process::exit(1);
        }
    };

    if let Err(e) = bf_agent::serve(config).await {
        error!(error = %e, "cannot start");
        std::process::exit(1);
    }
}
