// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! bf-core: shared types and utilities for the buildfleet services

pub mod async_map;
pub mod disposer;
pub mod id;
pub mod logging;
pub mod request;
pub mod result;

pub use async_map::map_concurrent;
pub use disposer::Disposer;
pub use id::JobId;
pub use request::{BuildRequest, ElectronDownload, TargetSpec};
pub use result::{ArtifactFile, BuildResult, ResultKind};
