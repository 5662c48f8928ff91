// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! bf-agent: the build agent daemon.
//!
//! Accepts project uploads over HTTP, runs the external packaging tool
//! through a priority worker pool, streams progress back as newline-delimited
//! JSON, serves the produced artifacts, and keeps a lease-backed entry in the
//! agent registry so the router can see this agent's load.

pub mod download;
pub mod env;
pub mod fsutil;
pub mod handler;
pub mod job;
pub mod runtime_fetch;
pub mod server;
pub mod unpack;

pub use handler::AgentState;
pub use server::{serve, Config};
