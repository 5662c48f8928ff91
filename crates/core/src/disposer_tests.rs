// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::*;

#[tokio::test]
async fn runs_in_insertion_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let disposer = Disposer::new();

    for step in 0..3 {
        let order = Arc::clone(&order);
        disposer.add(move || async move {
            order.lock().push(step);
        });
    }

    disposer.dispose().await;
    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

#[tokio::test]
async fn second_dispose_is_noop() {
    let calls = Arc::new(AtomicUsize::new(0));
    let disposer = Disposer::new();

    let counter = Arc::clone(&calls);
    disposer.add(move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    disposer.dispose().await;
    disposer.dispose().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn add_after_dispose_is_dropped() {
    let calls = Arc::new(AtomicUsize::new(0));
    let disposer = Disposer::new();
    disposer.dispose().await;

    let counter = Arc::clone(&calls);
    disposer.add(move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    disposer.dispose().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
