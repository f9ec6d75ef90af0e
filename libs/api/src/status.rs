//! Observed rollout status.
//!
//! Mutated exclusively by the reconciler; read by the admin API and CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tideway_id::{AnalysisRunId, ReplicaSetId};

use crate::AnalysisPhase;

/// Coarse rollout health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RolloutPhase {
    /// A release is in flight.
    #[default]
    Progressing,

    /// Held at a pause step or awaiting promotion.
    Paused,

    /// Aborted; canary torn down, stable serving all traffic.
    Degraded,

    /// Fully promoted, nothing in flight.
    Healthy,
}

impl std::fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RolloutPhase::Progressing => "progressing",
            RolloutPhase::Paused => "paused",
            RolloutPhase::Degraded => "degraded",
            RolloutPhase::Healthy => "healthy",
        };
        write!(f, "{}", s)
    }
}

/// Why a rollout is currently paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// A canary `pause` step.
    CanaryPauseStep,

    /// Blue-green preview awaiting promotion.
    BlueGreenPreview,
}

/// Present in status while the rollout is paused; cleared on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseCondition {
    pub reason: PauseReason,
    pub started_at: DateTime<Utc>,
}

/// Role a replica set plays in the rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaSetRole {
    /// Serving the currently-promoted revision.
    Stable,

    /// Running the in-progress revision (canary or blue-green preview).
    Canary,

    /// Superseded; kept only until history pruning removes it.
    Retired,
}

/// Reference to a replica set by revision, with last observed scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetRef {
    pub id: ReplicaSetId,

    /// Revision hash of the pod template this replica set runs.
    pub revision: String,

    /// Last observed replica count.
    pub replicas: u32,
}

/// Reference to an analysis run started for a step (or the whole rollout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRunRef {
    pub id: AnalysisRunId,

    /// Step index the run gates, if step-scoped.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub step_index: Option<u32>,

    /// Last observed phase.
    pub phase: AnalysisPhase,
}

/// Observed status for a rollout.
///
/// Created empty on first observation of a new spec; every field is derived
/// by reconciliation. Traffic weight is recorded only after the routing
/// capability confirms it was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RolloutStatus {
    pub phase: RolloutPhase,

    /// Position in the canary step list. `None` when no step sequence is in
    /// flight (fresh rollout, fully promoted, or blue-green).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_step_index: Option<u32>,

    /// Last traffic weight successfully applied to the routing capability.
    pub current_step_weight: i32,

    /// Revision hash currently promoted as stable.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stable_revision: Option<String>,

    /// Revision hash of the in-progress canary, if any.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub canary_revision: Option<String>,

    /// Stable replica set reference.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stable_replica_set: Option<ReplicaSetRef>,

    /// Canary/preview replica set reference.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub canary_replica_set: Option<ReplicaSetRef>,

    /// Present while paused.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub pause_conditions: Vec<PauseCondition>,

    /// Analysis runs started by the controller and not yet pruned.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub analysis_runs: Vec<AnalysisRunRef>,

    /// Abort requested (explicitly or by a failed gate).
    #[serde(default)]
    pub abort: bool,

    /// Promote requested: completes the current gate (pause or analysis)
    /// and advances one step; for blue-green, approves the cutover.
    #[serde(default)]
    pub promote_requested: bool,

    /// Skip all remaining steps and promote.
    #[serde(default)]
    pub promote_full: bool,

    /// When the blue-green preview became fully available; drives
    /// auto-promotion and the post-cutover scale-down grace window.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub preview_available_since: Option<DateTime<Utc>>,

    /// When the previous active replica set was superseded by a blue-green
    /// cutover; it stays scaled up until the grace window passes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cutover_at: Option<DateTime<Utc>>,

    /// Verbatim reason for the last Degraded transition, or other
    /// operator-facing detail.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,

    /// Spec generation this status was computed from.
    #[serde(default)]
    pub observed_generation: i64,
}

impl RolloutStatus {
    /// The pause condition with the given reason, if present.
    pub fn pause_condition(&self, reason: PauseReason) -> Option<&PauseCondition> {
        self.pause_conditions.iter().find(|c| c.reason == reason)
    }

    /// The analysis-run reference gating the given step, if any.
    pub fn analysis_run_for_step(&self, step_index: u32) -> Option<&AnalysisRunRef> {
        self.analysis_runs
            .iter()
            .find(|r| r.step_index == Some(step_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RolloutPhase::Progressing).unwrap(),
            "\"progressing\""
        );
        assert_eq!(
            serde_json::to_string(&RolloutPhase::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn default_status_is_empty_progressing() {
        let status = RolloutStatus::default();
        assert_eq!(status.phase, RolloutPhase::Progressing);
        assert_eq!(status.current_step_index, None);
        assert_eq!(status.current_step_weight, 0);
        assert!(!status.abort);
        assert!(status.pause_conditions.is_empty());
    }

    #[test]
    fn status_roundtrips_with_optionals() {
        let status = RolloutStatus {
            phase: RolloutPhase::Paused,
            current_step_index: Some(1),
            current_step_weight: 20,
            stable_revision: Some("sha256:aaaa".to_string()),
            canary_revision: Some("sha256:bbbb".to_string()),
            pause_conditions: vec![PauseCondition {
                reason: PauseReason::CanaryPauseStep,
                started_at: chrono::Utc::now(),
            }],
            ..Default::default()
        };

        let json = serde_json::to_string(&status).unwrap();
        let back: RolloutStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}
