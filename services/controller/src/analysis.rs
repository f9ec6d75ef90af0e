//! Analysis gating.
//!
//! An analysis run is a background evaluation of a template's metrics,
//! executed by an external backend. The gate owns the template registry and
//! the verdict reduction; the backend only takes measurements.
//!
//! Verdict rules:
//! - any metric at its failure limit fails the run immediately
//! - a metric the backend cannot evaluate yields `Error` (gates like
//!   `Failed`, distinguished in the message for diagnostics)
//! - the run is `Successful` only when every metric reached its success
//!   count
//! - a run terminated before any of the above is `Inconclusive`

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tideway_api::{
    AnalysisPhase, AnalysisStepSpec, AnalysisTemplate, Measurement, MeasurementStatus,
    MetricResult, ValidationError,
};
use tideway_id::{AnalysisRunId, RolloutId};
use tracing::debug;

use crate::error::{ControllerError, Result};

/// A started analysis run, as reported by the backend.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub id: AnalysisRunId,
    pub rollout: RolloutId,
    pub template_name: String,
    pub args: BTreeMap<String, String>,
    pub metric_results: Vec<MetricResult>,

    /// Set when the run was stopped before reaching a verdict.
    pub terminated: bool,

    pub started_at: DateTime<Utc>,
}

/// The analysis capability an external backend provides.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn start(
        &self,
        rollout: RolloutId,
        template: &AnalysisTemplate,
        args: &BTreeMap<String, String>,
    ) -> Result<AnalysisRunId>;

    async fn get(&self, id: AnalysisRunId) -> Result<AnalysisRun>;

    async fn terminate(&self, id: AnalysisRunId) -> Result<()>;
}

/// Reduced verdict for a run, with the failing reason when there is one.
#[derive(Debug, Clone, PartialEq)]
pub struct GateVerdict {
    pub phase: AnalysisPhase,
    pub message: Option<String>,
}

impl GateVerdict {
    fn running() -> Self {
        Self {
            phase: AnalysisPhase::Running,
            message: None,
        }
    }
}

/// Starts, polls, and terminates analysis runs for the strategy engine.
pub struct AnalysisGate {
    backend: Arc<dyn AnalysisBackend>,
    templates: HashMap<String, AnalysisTemplate>,
}

impl AnalysisGate {
    pub fn new(backend: Arc<dyn AnalysisBackend>) -> Self {
        Self {
            backend,
            templates: HashMap::new(),
        }
    }

    /// Register a template. Templates are configuration: loaded at startup,
    /// never mutated after.
    pub fn with_template(mut self, template: AnalysisTemplate) -> Self {
        self.templates.insert(template.name.clone(), template);
        self
    }

    /// Start a run for a step. An unknown template is a permanent
    /// configuration error, reported as validation so the caller aborts
    /// rather than retries.
    pub async fn start(&self, rollout: RolloutId, step: &AnalysisStepSpec) -> Result<AnalysisRunId> {
        let template = self.templates.get(&step.template_name).ok_or_else(|| {
            ControllerError::Validation(ValidationError::Malformed(format!(
                "unknown analysis template '{}'",
                step.template_name
            )))
        })?;
        let id = self.backend.start(rollout, template, &step.args).await?;
        debug!(rollout = %rollout, run = %id, template = %template.name, "Started analysis run");
        Ok(id)
    }

    /// Poll a run and reduce its measurements to a verdict.
    pub async fn poll(&self, id: AnalysisRunId) -> Result<GateVerdict> {
        let run = self.backend.get(id).await?;
        let Some(template) = self.templates.get(&run.template_name) else {
            return Ok(GateVerdict {
                phase: AnalysisPhase::Error,
                message: Some(format!(
                    "analysis template '{}' disappeared from configuration",
                    run.template_name
                )),
            });
        };
        Ok(reduce_verdict(template, &run))
    }

    /// Stop a run that no longer gates anything (its step was superseded).
    pub async fn terminate(&self, id: AnalysisRunId) -> Result<()> {
        self.backend.terminate(id).await
    }

    /// How often a run of this template is worth polling.
    pub fn poll_interval(&self, template_name: &str) -> Duration {
        let secs = self
            .templates
            .get(template_name)
            .and_then(|t| t.metrics.iter().map(|m| m.interval_secs).min())
            .unwrap_or(10);
        Duration::from_secs(secs)
    }
}

/// Reduce a run's measurements to a verdict against its template.
pub fn reduce_verdict(template: &AnalysisTemplate, run: &AnalysisRun) -> GateVerdict {
    let mut all_passed = !template.metrics.is_empty();
    let mut any_measurement = false;

    for spec in &template.metrics {
        let result = run.metric_results.iter().find(|r| r.name == spec.name);
        let Some(result) = result else {
            all_passed = false;
            continue;
        };
        any_measurement |= !result.measurements.is_empty();

        if result.errors >= spec.failure_limit {
            return GateVerdict {
                phase: AnalysisPhase::Error,
                message: Some(format!(
                    "metric '{}' could not be evaluated ({} errors)",
                    spec.name, result.errors
                )),
            };
        }
        if result.failed >= spec.failure_limit {
            return GateVerdict {
                phase: AnalysisPhase::Failed,
                message: Some(format!(
                    "metric '{}' reached its failure limit ({}/{})",
                    spec.name, result.failed, spec.failure_limit
                )),
            };
        }
        if result.successful < spec.count {
            all_passed = false;
        }
    }

    if all_passed {
        return GateVerdict {
            phase: AnalysisPhase::Successful,
            message: None,
        };
    }

    if run.terminated {
        return GateVerdict {
            phase: AnalysisPhase::Inconclusive,
            message: Some("run terminated before reaching a verdict".to_string()),
        };
    }

    if !any_measurement {
        return GateVerdict {
            phase: AnalysisPhase::Pending,
            message: None,
        };
    }

    GateVerdict::running()
}

/// Mock backend for testing and development.
///
/// Tests drive runs by recording measurements; the gate reduces them the
/// same way it would production measurements.
#[derive(Default)]
pub struct MockAnalysisBackend {
    runs: RwLock<HashMap<AnalysisRunId, AnalysisRun>>,
}

impl MockAnalysisBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one measurement for a metric of a run.
    pub fn record(&self, id: AnalysisRunId, metric: &str, status: MeasurementStatus, value: f64) {
        if let Ok(mut runs) = self.runs.write() {
            if let Some(run) = runs.get_mut(&id) {
                if !run.metric_results.iter().any(|r| r.name == metric) {
                    run.metric_results.push(MetricResult::new(metric));
                }
                if let Some(result) = run.metric_results.iter_mut().find(|r| r.name == metric) {
                    result.record(Measurement {
                        status,
                        value: Some(value),
                        taken_at: Utc::now(),
                    });
                }
            }
        }
    }

    /// Snapshot of a run.
    pub fn run(&self, id: AnalysisRunId) -> Option<AnalysisRun> {
        self.runs.read().ok()?.get(&id).cloned()
    }
}

#[async_trait]
impl AnalysisBackend for MockAnalysisBackend {
    async fn start(
        &self,
        rollout: RolloutId,
        template: &AnalysisTemplate,
        args: &BTreeMap<String, String>,
    ) -> Result<AnalysisRunId> {
        let run = AnalysisRun {
            id: AnalysisRunId::new(),
            rollout,
            template_name: template.name.clone(),
            args: args.clone(),
            metric_results: Vec::new(),
            terminated: false,
            started_at: Utc::now(),
        };
        let id = run.id;
        self.runs
            .write()
            .map_err(|_| ControllerError::Internal("backend lock poisoned".into()))?
            .insert(id, run);
        Ok(id)
    }

    async fn get(&self, id: AnalysisRunId) -> Result<AnalysisRun> {
        self.runs
            .read()
            .map_err(|_| ControllerError::Internal("backend lock poisoned".into()))?
            .get(&id)
            .cloned()
            .ok_or_else(|| ControllerError::NotFound(id.to_string()))
    }

    async fn terminate(&self, id: AnalysisRunId) -> Result<()> {
        let mut runs = self
            .runs
            .write()
            .map_err(|_| ControllerError::Internal("backend lock poisoned".into()))?;
        if let Some(run) = runs.get_mut(&id) {
            run.terminated = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tideway_api::MetricSpec;

    use super::*;

    fn template() -> AnalysisTemplate {
        AnalysisTemplate {
            name: "success-rate".to_string(),
            metrics: vec![MetricSpec {
                name: "error_rate".to_string(),
                interval_secs: 5,
                count: 2,
                failure_limit: 2,
                args: BTreeMap::new(),
            }],
        }
    }

    fn gate() -> (Arc<MockAnalysisBackend>, AnalysisGate) {
        let backend = Arc::new(MockAnalysisBackend::new());
        let gate = AnalysisGate::new(Arc::clone(&backend) as Arc<dyn AnalysisBackend>)
            .with_template(template());
        (backend, gate)
    }

    fn step() -> AnalysisStepSpec {
        AnalysisStepSpec {
            template_name: "success-rate".to_string(),
            args: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn run_succeeds_after_enough_passing_measurements() {
        let (backend, gate) = gate();
        let rollout = RolloutId::new();
        let id = gate.start(rollout, &step()).await.unwrap();

        assert_eq!(gate.poll(id).await.unwrap().phase, AnalysisPhase::Pending);

        backend.record(id, "error_rate", MeasurementStatus::Successful, 0.01);
        assert_eq!(gate.poll(id).await.unwrap().phase, AnalysisPhase::Running);

        backend.record(id, "error_rate", MeasurementStatus::Successful, 0.02);
        assert_eq!(gate.poll(id).await.unwrap().phase, AnalysisPhase::Successful);
    }

    #[tokio::test]
    async fn failure_limit_fails_the_run_with_reason() {
        let (backend, gate) = gate();
        let id = gate.start(RolloutId::new(), &step()).await.unwrap();

        backend.record(id, "error_rate", MeasurementStatus::Failed, 0.4);
        backend.record(id, "error_rate", MeasurementStatus::Failed, 0.5);

        let verdict = gate.poll(id).await.unwrap();
        assert_eq!(verdict.phase, AnalysisPhase::Failed);
        let message = verdict.message.unwrap_or_default();
        assert!(message.contains("error_rate"), "got: {message}");
    }

    #[tokio::test]
    async fn evaluation_errors_yield_error_phase() {
        let (backend, gate) = gate();
        let id = gate.start(RolloutId::new(), &step()).await.unwrap();

        backend.record(id, "error_rate", MeasurementStatus::Error, 0.0);
        backend.record(id, "error_rate", MeasurementStatus::Error, 0.0);

        let verdict = gate.poll(id).await.unwrap();
        assert_eq!(verdict.phase, AnalysisPhase::Error);
        assert!(verdict.phase.is_gate_failure());
    }

    #[tokio::test]
    async fn terminated_run_without_verdict_is_inconclusive() {
        let (backend, gate) = gate();
        let id = gate.start(RolloutId::new(), &step()).await.unwrap();

        backend.record(id, "error_rate", MeasurementStatus::Successful, 0.01);
        gate.terminate(id).await.unwrap();

        let verdict = gate.poll(id).await.unwrap();
        assert_eq!(verdict.phase, AnalysisPhase::Inconclusive);
    }

    #[tokio::test]
    async fn unknown_template_is_a_validation_error() {
        let (_, gate) = gate();
        let err = gate
            .start(
                RolloutId::new(),
                &AnalysisStepSpec {
                    template_name: "no-such-template".to_string(),
                    args: BTreeMap::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Validation(_)));
    }

    #[test]
    fn poll_interval_uses_smallest_metric_interval() {
        let backend = Arc::new(MockAnalysisBackend::new());
        let gate = AnalysisGate::new(backend).with_template(template());
        assert_eq!(gate.poll_interval("success-rate"), Duration::from_secs(5));
        assert_eq!(gate.poll_interval("unknown"), Duration::from_secs(10));
    }

    fn run_with_counts(successful: u32, failed: u32, errors: u32) -> AnalysisRun {
        let mut result = MetricResult::new("error_rate");
        result.successful = successful;
        result.failed = failed;
        result.errors = errors;
        result.measurements = vec![Measurement {
            status: MeasurementStatus::Successful,
            value: Some(0.0),
            taken_at: Utc::now(),
        }];
        AnalysisRun {
            id: AnalysisRunId::new(),
            rollout: RolloutId::new(),
            template_name: "success-rate".to_string(),
            args: BTreeMap::new(),
            metric_results: vec![result],
            terminated: false,
            started_at: Utc::now(),
        }
    }

    #[rstest::rstest]
    // template requires count=2 successes, failure_limit=2
    #[case::passing(2, 0, 0, AnalysisPhase::Successful)]
    #[case::still_counting(1, 0, 0, AnalysisPhase::Running)]
    #[case::one_failure_tolerated(1, 1, 0, AnalysisPhase::Running)]
    #[case::failure_limit_hit(0, 2, 0, AnalysisPhase::Failed)]
    #[case::error_limit_hit(0, 0, 2, AnalysisPhase::Error)]
    #[case::failed_even_with_successes(2, 2, 0, AnalysisPhase::Failed)]
    fn verdict_reduction_cases(
        #[case] successful: u32,
        #[case] failed: u32,
        #[case] errors: u32,
        #[case] expected: AnalysisPhase,
    ) {
        let verdict = reduce_verdict(&template(), &run_with_counts(successful, failed, errors));
        assert_eq!(verdict.phase, expected);
    }
}
