//! Rollout spec types: pod template, strategy, steps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tideway_reconcile::RevisionHash;

/// Declarative specification for a progressive-delivery-governed workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutSpec {
    /// Human-facing name, unique per controller instance.
    pub name: String,

    /// Total desired replica count across stable and canary.
    pub replicas: i32,

    /// Pod template for the workload.
    pub template: PodTemplate,

    /// Optional reference to an externally-owned pod-template source.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub workload_ref: Option<WorkloadRef>,

    /// Release strategy.
    pub strategy: Strategy,

    /// Restart marker: bumping this timestamp forces a new revision without
    /// a template edit.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub restarted_at: Option<DateTime<Utc>>,
}

impl RolloutSpec {
    /// Compute the revision hash for the current pod template.
    ///
    /// Includes the restart marker, so `tidectl restart` yields a fresh
    /// revision for an otherwise unchanged template.
    pub fn template_hash(&self) -> RevisionHash {
        let input = serde_json::json!({
            "template": self.template,
            "restarted_at": self.restarted_at,
        });
        RevisionHash::from_json(&input)
    }

    /// The canary step list, empty for blue-green.
    pub fn steps(&self) -> &[Step] {
        match &self.strategy {
            Strategy::Canary(c) => &c.steps,
            Strategy::BlueGreen(_) => &[],
        }
    }
}

/// Pod template for the replicated workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodTemplate {
    /// Container image reference.
    pub image: String,

    /// Command override.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub command: Vec<String>,

    /// Environment variables.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub env: BTreeMap<String, String>,
}

/// Reference to an externally-owned pod-template source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadRef {
    /// Kind of the referenced workload (e.g. "deployment").
    pub kind: String,

    /// Name of the referenced workload.
    pub name: String,
}

/// Release strategy kind.
///
/// Externally tagged: a spec carries either a `canary` or a `blue_green`
/// object. Any other key fails deserialization, which the admission path
/// reports as a validation error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Incremental weighted traffic shift across ordered steps.
    Canary(CanarySpec),

    /// Full staging of the new revision, then an atomic cutover.
    BlueGreen(BlueGreenSpec),
}

impl Strategy {
    /// Short kind string for logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Strategy::Canary(_) => "canary",
            Strategy::BlueGreen(_) => "blue_green",
        }
    }
}

/// Canary strategy: ordered steps executed one at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanarySpec {
    /// Ordered release plan. An empty list promotes immediately.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Blue-green strategy: preview at full scale, then a 0→100 cutover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueGreenSpec {
    /// Analysis gate run against the preview before promotion is allowed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pre_promotion_analysis: Option<AnalysisStepSpec>,

    /// Auto-promote this long after the preview is fully available.
    /// Absent means promotion is manual only.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub auto_promote_after_secs: Option<u64>,

    /// How long the previous active replica set stays scaled up after
    /// cutover, for fast rollback.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scale_down_grace_secs: Option<u64>,
}

impl BlueGreenSpec {
    /// Default scale-down grace window after cutover.
    pub const DEFAULT_SCALE_DOWN_GRACE_SECS: u64 = 30;

    /// Effective scale-down grace window.
    pub fn scale_down_grace(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.scale_down_grace_secs
                .unwrap_or(Self::DEFAULT_SCALE_DOWN_GRACE_SECS),
        )
    }
}

/// One unit of a canary release plan.
///
/// A closed tagged variant: unknown step kinds are a deserialization error,
/// never a silently-skipped step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Converge traffic to this percentage of the canary.
    SetWeight {
        /// Target weight in percent, [0, 100].
        weight: i32,
    },

    /// Hold the rollout. Without a duration the pause is indefinite and
    /// cleared only by an explicit promote.
    Pause {
        #[serde(skip_serializing_if = "Option::is_none", default)]
        duration_secs: Option<u64>,
    },

    /// Gate advancement on an analysis run.
    Analysis(AnalysisStepSpec),

    /// Launch an experiment (handled by an external controller).
    Experiment {
        /// Experiment template name.
        name: String,
    },
}

impl Step {
    /// Short kind string for logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Step::SetWeight { .. } => "set_weight",
            Step::Pause { .. } => "pause",
            Step::Analysis(_) => "analysis",
            Step::Experiment { .. } => "experiment",
        }
    }
}

/// Arguments for starting an analysis run from a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisStepSpec {
    /// Name of the analysis template to instantiate.
    pub template_name: String,

    /// Arguments passed through to the template's metric providers.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub args: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canary_spec() -> RolloutSpec {
        RolloutSpec {
            name: "checkout".to_string(),
            replicas: 5,
            template: PodTemplate {
                image: "registry.test/checkout:v2".to_string(),
                command: vec![],
                env: BTreeMap::new(),
            },
            workload_ref: None,
            strategy: Strategy::Canary(CanarySpec {
                steps: vec![
                    Step::SetWeight { weight: 20 },
                    Step::Pause {
                        duration_secs: Some(10),
                    },
                ],
            }),
            restarted_at: None,
        }
    }

    #[test]
    fn strategy_serializes_externally_tagged() {
        let json = serde_json::to_value(&canary_spec()).unwrap();
        assert!(json["strategy"]["canary"]["steps"].is_array());
    }

    #[test]
    fn unknown_strategy_kind_is_an_error() {
        let json = serde_json::json!({ "recreate": {} });
        assert!(serde_json::from_value::<Strategy>(json).is_err());
    }

    #[test]
    fn unknown_step_kind_is_an_error() {
        let json = serde_json::json!({ "bake": { "minutes": 5 } });
        assert!(serde_json::from_value::<Step>(json).is_err());
    }

    #[test]
    fn spec_roundtrips() {
        let spec = canary_spec();
        let json = serde_json::to_string(&spec).unwrap();
        let back: RolloutSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn template_hash_tracks_image_and_restart_marker() {
        let spec = canary_spec();
        let base = spec.template_hash();

        let mut edited = spec.clone();
        edited.template.image = "registry.test/checkout:v3".to_string();
        assert_ne!(edited.template_hash(), base);

        let mut restarted = spec.clone();
        restarted.restarted_at = Some(chrono::Utc::now());
        assert_ne!(restarted.template_hash(), base);

        // Replica-count-only changes do not create a new revision
        let mut scaled = spec;
        scaled.replicas = 10;
        assert_eq!(scaled.template_hash(), base);
    }
}
