//! Delivery interface for rollout events.

use async_trait::async_trait;
use thiserror::Error;

use crate::RolloutEvent;

/// Sink delivery errors. Non-fatal to reconciliation by contract.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Where rollout events go: a notification service, an audit log, a test
/// capture buffer. Implementations must not block reconciliation; slow
/// transports should buffer internally.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, event: &RolloutEvent) -> Result<(), SinkError>;
}

/// Sink that drops everything. Default when no notification service is
/// configured.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl EventSink for NullSink {
    async fn deliver(&self, _event: &RolloutEvent) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Sink that captures events in memory for test assertions.
#[derive(Debug, Default)]
pub struct CaptureSink {
    events: std::sync::Mutex<Vec<RolloutEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far.
    pub fn captured(&self) -> Vec<RolloutEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for CaptureSink {
    async fn deliver(&self, event: &RolloutEvent) -> Result<(), SinkError> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tideway_id::RolloutId;

    use super::*;
    use crate::EventReason;

    #[tokio::test]
    async fn capture_sink_records_events() {
        let sink = CaptureSink::new();
        let event = RolloutEvent::normal(
            RolloutId::new(),
            "api",
            EventReason::RolloutCompleted,
            "rollout fully promoted",
        );
        sink.deliver(&event).await.unwrap();
        let captured = sink.captured();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].reason, EventReason::RolloutCompleted);
    }
}
