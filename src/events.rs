//! Lifecycle event stream
//!
//! Every run-state transition is published here so a log viewer (or a test)
//! can observe the stack without polling the status table.

use crate::stack::orchestrator::RunState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// One run-state transition
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    /// Service the transition belongs to
    pub service: String,
    /// When the transition happened
    pub timestamp: DateTime<Utc>,
    /// Previous state
    pub old_state: RunState,
    /// New state
    pub new_state: RunState,
    /// Human-readable cause, when there is one
    pub reason: Option<String>,
}

/// Broadcast bus for lifecycle events. Cloning shares the underlying
/// channel; subscribers only see events emitted after they subscribe.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Create a bus with the given buffer capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }

    /// Publish a transition. Lagging or absent subscribers never block
    /// the orchestrator.
    pub fn emit(
        &self,
        service: &str,
        old_state: RunState,
        new_state: RunState,
        reason: Option<String>,
    ) {
        let event = LifecycleEvent {
            service: service.to_string(),
            timestamp: Utc::now(),
            old_state,
            new_state,
            reason,
        };
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_receives_emitted_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit("db", RunState::Pending, RunState::Starting, None);
        bus.emit(
            "db",
            RunState::Starting,
            RunState::Started,
            Some("process launched".to_string()),
        );

        let first = rx.recv().await.unwrap();
        assert_eq!(first.service, "db");
        assert_eq!(first.new_state, RunState::Starting);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.new_state, RunState::Started);
        assert!(second.reason.is_some());
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(8);
        bus.emit("db", RunState::Pending, RunState::Starting, None);
    }
}
