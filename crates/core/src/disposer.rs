// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered shutdown chain.
//!
//! Cleanup steps registered during startup run in insertion order on
//! `dispose()`, which is safe to call more than once (later calls are
//! no-ops). The agent uses this to remove its registry entry before the
//! HTTP server begins draining connections.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

type Disposable = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub struct Disposer {
    disposables: Mutex<Option<Vec<Disposable>>>,
}

impl Disposer {
    pub fn new() -> Self {
        Self { disposables: Mutex::new(Some(Vec::new())) }
    }

    /// Register a cleanup step. Ignored if `dispose` already ran.
    pub fn add<F, Fut>(&self, disposable: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if let Some(list) = self.disposables.lock().as_mut() {
            list.push(Box::new(move || Box::pin(disposable())));
        }
    }

    /// Run all registered steps in insertion order.
    pub async fn dispose(&self) {
        let taken = self.disposables.lock().take();
        let Some(list) = taken else {
            return;
        };
        for disposable in list {
            disposable().await;
        }
    }
}

#[cfg(test)]
#[path = "disposer_tests.rs"]
mod tests;
