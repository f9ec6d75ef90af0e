//! Analysis types: templates, metrics, measurements, phases.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle phase of an analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisPhase {
    /// Accepted, no measurements yet.
    Pending,

    /// Measurements in progress.
    Running,

    /// Every metric reached its success count.
    Successful,

    /// A metric reached its failure limit.
    Failed,

    /// The backend could not evaluate a metric. Gates like `Failed`,
    /// distinguished in status for diagnostics.
    Error,

    /// Terminated without enough data to decide either way.
    Inconclusive,
}

impl AnalysisPhase {
    /// Whether this phase is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AnalysisPhase::Pending | AnalysisPhase::Running)
    }

    /// Whether this phase aborts the rollout when gating a step.
    pub fn is_gate_failure(&self) -> bool {
        matches!(self, AnalysisPhase::Failed | AnalysisPhase::Error)
    }
}

impl std::fmt::Display for AnalysisPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AnalysisPhase::Pending => "pending",
            AnalysisPhase::Running => "running",
            AnalysisPhase::Successful => "successful",
            AnalysisPhase::Failed => "failed",
            AnalysisPhase::Error => "error",
            AnalysisPhase::Inconclusive => "inconclusive",
        };
        write!(f, "{}", s)
    }
}

/// A named set of metrics evaluated together as one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisTemplate {
    pub name: String,
    pub metrics: Vec<MetricSpec>,
}

/// One metric within an analysis template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,

    /// Seconds between measurements.
    #[serde(default = "MetricSpec::default_interval_secs")]
    pub interval_secs: u64,

    /// Successful measurements required for this metric to pass.
    #[serde(default = "MetricSpec::default_count")]
    pub count: u32,

    /// Failed measurements at which the whole run fails.
    #[serde(default = "MetricSpec::default_failure_limit")]
    pub failure_limit: u32,

    /// Provider-specific query arguments.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub args: BTreeMap<String, String>,
}

impl MetricSpec {
    fn default_interval_secs() -> u64 {
        10
    }

    fn default_count() -> u32 {
        3
    }

    fn default_failure_limit() -> u32 {
        1
    }
}

/// Outcome of a single measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementStatus {
    Successful,
    Failed,
    /// The provider could not be evaluated.
    Error,
}

/// One evaluated sample of a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub status: MeasurementStatus,

    /// Raw value, when the provider produced one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<f64>,

    pub taken_at: DateTime<Utc>,
}

/// Accumulated measurements for one metric of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub name: String,
    pub successful: u32,
    pub failed: u32,
    pub errors: u32,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub measurements: Vec<Measurement>,
}

impl MetricResult {
    /// Start an empty result for a metric.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            successful: 0,
            failed: 0,
            errors: 0,
            measurements: Vec::new(),
        }
    }

    /// Record one measurement.
    pub fn record(&mut self, measurement: Measurement) {
        match measurement.status {
            MeasurementStatus::Successful => self.successful += 1,
            MeasurementStatus::Failed => self.failed += 1,
            MeasurementStatus::Error => self.errors += 1,
        }
        self.measurements.push(measurement);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases() {
        assert!(!AnalysisPhase::Pending.is_terminal());
        assert!(!AnalysisPhase::Running.is_terminal());
        assert!(AnalysisPhase::Successful.is_terminal());
        assert!(AnalysisPhase::Failed.is_terminal());
        assert!(AnalysisPhase::Error.is_terminal());
        assert!(AnalysisPhase::Inconclusive.is_terminal());
    }

    #[test]
    fn gate_failure_includes_error() {
        assert!(AnalysisPhase::Failed.is_gate_failure());
        assert!(AnalysisPhase::Error.is_gate_failure());
        assert!(!AnalysisPhase::Successful.is_gate_failure());
        assert!(!AnalysisPhase::Inconclusive.is_gate_failure());
    }

    #[test]
    fn metric_result_counts_by_status() {
        let mut result = MetricResult::new("error_rate");
        let now = chrono::Utc::now();
        result.record(Measurement {
            status: MeasurementStatus::Successful,
            value: Some(0.01),
            taken_at: now,
        });
        result.record(Measurement {
            status: MeasurementStatus::Failed,
            value: Some(0.2),
            taken_at: now,
        });
        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors, 0);
    }

    #[test]
    fn metric_spec_defaults() {
        let spec: MetricSpec =
            serde_json::from_value(serde_json::json!({ "name": "latency_p99" })).unwrap();
        assert_eq!(spec.interval_secs, 10);
        assert_eq!(spec.count, 3);
        assert_eq!(spec.failure_limit, 1);
    }
}
