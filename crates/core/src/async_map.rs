// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded parallel map.
//!
//! Runs `task_count` independent fallible tasks with at most `concurrency`
//! in flight. The first error wins: tasks that have not started yet observe
//! the quit signal and become no-ops, and the call returns once every
//! accepted task has drained.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Map `0..task_count` concurrently, capped at `concurrency`.
///
/// `task_count == 0` returns immediately; a single task runs inline on the
/// caller's task without any spawning.
pub async fn map_concurrent<E, F, Fut>(
    task_count: usize,
    concurrency: usize,
    make_task: F,
) -> Result<(), E>
where
    E: Send + 'static,
    F: Fn(usize) -> Fut,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    if task_count == 0 {
        return Ok(());
    }
    if task_count == 1 {
        return make_task(0).await;
    }

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let quit = CancellationToken::new();

    let mut tasks = JoinSet::new();
    for index in 0..task_count {
        let semaphore = Arc::clone(&semaphore);
        let quit = quit.clone();
        let task = make_task(index);
        tasks.spawn(async move {
            // Semaphore is never closed, so acquire only fails on shutdown.
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return Ok(());
            };
            if quit.is_cancelled() {
                return Ok(());
            }
            task.await
        });
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                if first_error.is_none() {
                    quit.cancel();
                    first_error = Some(error);
                }
            }
            Err(join_error) => {
                tracing::error!(error = %join_error, "map task aborted");
                quit.cancel();
            }
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[cfg(test)]
#[path = "async_map_tests.rs"]
mod tests;
