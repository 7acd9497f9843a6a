#![forbid(unsafe_code)]

use tokio::sync::broadcast;

use crate::StreamEvent;

/// Broadcast bus for [`StreamEvent`]s.
///
/// `publish()` is a sync call and never blocks. If there are no subscribers,
/// events are silently dropped.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<StreamEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all subscribers.
    pub fn publish<E: Into<StreamEvent>>(&self, event: E) {
        let _ = self.tx.send(event.into());
    }

    /// Subscribe to all future events.
    ///
    /// Slow subscribers receive `RecvError::Lagged(n)` instead of blocking
    /// the session.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.tx.subscribe()
    }
}
