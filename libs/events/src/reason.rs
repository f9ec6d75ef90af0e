//! The closed set of built-in event reasons.
//!
//! Reasons are short and UpperCamelCase in their string form so downstream
//! automation can switch on them; notification triggers subscribe by reason.

use serde::{Deserialize, Serialize};

/// Why an event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventReason {
    /// A new revision was observed and a rollout started.
    RolloutUpdated,

    /// One step of the release plan completed.
    RolloutStepCompleted,

    /// The rollout reached full promotion.
    RolloutCompleted,

    /// The rollout entered a pause.
    RolloutPaused,

    /// A pause was cleared (elapsed or promoted).
    RolloutResumed,

    /// The rollout was aborted and rolled back.
    RolloutAborted,

    /// A Degraded rollout was retried.
    RolloutRetried,

    /// A replica set was created or scaled.
    ScalingReplicaSet,

    /// Traffic weight converged to a new value.
    TrafficWeightUpdated,

    /// An analysis run was started.
    AnalysisRunStarted,

    /// An analysis run reached a terminal phase.
    AnalysisRunCompleted,
}

impl EventReason {
    /// String form, stable across releases.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventReason::RolloutUpdated => "RolloutUpdated",
            EventReason::RolloutStepCompleted => "RolloutStepCompleted",
            EventReason::RolloutCompleted => "RolloutCompleted",
            EventReason::RolloutPaused => "RolloutPaused",
            EventReason::RolloutResumed => "RolloutResumed",
            EventReason::RolloutAborted => "RolloutAborted",
            EventReason::RolloutRetried => "RolloutRetried",
            EventReason::ScalingReplicaSet => "ScalingReplicaSet",
            EventReason::TrafficWeightUpdated => "TrafficWeightUpdated",
            EventReason::AnalysisRunStarted => "AnalysisRunStarted",
            EventReason::AnalysisRunCompleted => "AnalysisRunCompleted",
        }
    }
}

impl std::fmt::Display for EventReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_string_form_is_upper_camel() {
        assert_eq!(EventReason::RolloutStepCompleted.as_str(), "RolloutStepCompleted");
        assert_eq!(EventReason::ScalingReplicaSet.to_string(), "ScalingReplicaSet");
    }
}
