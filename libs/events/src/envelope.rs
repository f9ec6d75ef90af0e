//! Rollout event envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tideway_id::RolloutId;

use crate::EventReason;

/// Event severity, mirroring the normal/warning split of the underlying
/// platform's event API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[default]
    Normal,
    Warning,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Normal => write!(f, "normal"),
            EventType::Warning => write!(f, "warning"),
        }
    }
}

/// One rollout state transition, as delivered to sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutEvent {
    /// The rollout this event belongs to.
    pub rollout_id: RolloutId,

    /// Rollout name, for human-facing routing.
    pub rollout_name: String,

    pub event_type: EventType,

    /// Machine-readable reason from the closed built-in set.
    pub reason: EventReason,

    /// Human-readable detail.
    pub message: String,

    pub occurred_at: DateTime<Utc>,
}

impl RolloutEvent {
    /// Build a normal event.
    pub fn normal(
        rollout_id: RolloutId,
        rollout_name: impl Into<String>,
        reason: EventReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rollout_id,
            rollout_name: rollout_name.into(),
            event_type: EventType::Normal,
            reason,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }

    /// Build a warning event.
    pub fn warning(
        rollout_id: RolloutId,
        rollout_name: impl Into<String>,
        reason: EventReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rollout_id,
            rollout_name: rollout_name.into(),
            event_type: EventType::Warning,
            reason,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_serialization() {
        assert_eq!(
            serde_json::to_string(&EventType::Normal).unwrap(),
            "\"normal\""
        );
        assert_eq!(
            serde_json::to_string(&EventType::Warning).unwrap(),
            "\"warning\""
        );
    }

    #[test]
    fn event_roundtrips() {
        let event = RolloutEvent::warning(
            RolloutId::new(),
            "checkout",
            EventReason::RolloutAborted,
            "analysis run failed: error_rate reached failure limit",
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: RolloutEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
