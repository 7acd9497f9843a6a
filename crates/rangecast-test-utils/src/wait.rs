//! Polling helpers for asserting on asynchronous progress.

use std::{future::Future, time::Duration};

use rangecast_stream::StreamEvent;
use tokio::sync::broadcast;

/// Poll `condition` every few milliseconds until it holds.
///
/// # Panics
///
/// Panics if `condition` does not hold within `timeout`.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// First event matching `predicate`, skipping the rest.
///
/// # Panics
///
/// Panics on timeout, lag, or a closed bus.
pub async fn next_event<P>(
    rx: &mut broadcast::Receiver<StreamEvent>,
    timeout: Duration,
    mut predicate: P,
) -> StreamEvent
where
    P: FnMut(&StreamEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            let event = rx.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no matching event within {timeout:?}"))
}
