//! Event recording.
//!
//! Every observable state transition becomes a `RolloutEvent`: logged with
//! structured fields, counted per (reason, type), and forwarded to the
//! configured sink. Sink failures are logged and swallowed; reconciliation
//! never fails or blocks because a notification could not be delivered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tideway_events::{EventReason, EventSink, EventType, RolloutEvent};
use tracing::{info, warn};

/// Records rollout events.
pub struct EventRecorder {
    sink: Arc<dyn EventSink>,
    counters: Mutex<HashMap<(EventReason, EventType), u64>>,
}

impl EventRecorder {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Emit one event.
    pub async fn event(&self, event: RolloutEvent) {
        match event.event_type {
            EventType::Normal => info!(
                rollout = %event.rollout_name,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventType::Warning => warn!(
                rollout = %event.rollout_name,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }

        if let Ok(mut counters) = self.counters.lock() {
            *counters
                .entry((event.reason, event.event_type))
                .or_insert(0) += 1;
        }

        if let Err(e) = self.sink.deliver(&event).await {
            warn!(
                rollout = %event.rollout_name,
                reason = %event.reason,
                error = %e,
                "Event sink delivery failed"
            );
        }
    }

    /// Emitted-event count for a (reason, type) pair.
    pub fn count(&self, reason: EventReason, event_type: EventType) -> u64 {
        self.counters
            .lock()
            .ok()
            .and_then(|c| c.get(&(reason, event_type)).copied())
            .unwrap_or(0)
    }
}
