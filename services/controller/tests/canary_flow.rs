//! Integration tests for the canary strategy.
//!
//! Drives the real strategy engine against the mock cluster, router, and
//! analysis backend, persisting each pass through the versioned store the
//! way the reconciler does. Time is injected so timed pauses are tested
//! without sleeping.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tideway_api::{
    validate_spec, AnalysisStepSpec, AnalysisTemplate, CanarySpec, MetricSpec,
    MeasurementStatus, PauseReason, PodTemplate, ReplicaSetRole, RolloutPhase, RolloutSpec,
    RolloutStatus, Step, Strategy,
};
use tideway_controller::strategy::{self, EngineDeps, Transition};
use tideway_controller::{
    AnalysisGate, ClusterApi, EventRecorder, MemoryStore, MockAnalysisBackend, MockCluster,
    MockRouter, ReplicaSetManager, RolloutRecord, RolloutStore, TrafficWeightController,
};
use tideway_events::{CaptureSink, EventReason};
use tideway_id::RolloutId;

struct Harness {
    store: MemoryStore,
    cluster: Arc<MockCluster>,
    router: Arc<MockRouter>,
    backend: Arc<MockAnalysisBackend>,
    sink: Arc<CaptureSink>,
}

impl Harness {
    fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            cluster: Arc::new(MockCluster::new()),
            router: Arc::new(MockRouter::new()),
            backend: Arc::new(MockAnalysisBackend::new()),
            sink: Arc::new(CaptureSink::new()),
        }
    }

    fn deps(&self) -> EngineDeps {
        EngineDeps {
            replicasets: ReplicaSetManager::new(Arc::clone(&self.cluster) as _, 10),
            traffic: TrafficWeightController::new(Arc::clone(&self.router) as _),
            analysis: AnalysisGate::new(Arc::clone(&self.backend) as _)
                .with_template(error_rate_template()),
            recorder: EventRecorder::new(Arc::clone(&self.sink) as _),
        }
    }

    async fn apply(&self, spec: RolloutSpec) -> RolloutRecord {
        validate_spec(&spec).expect("spec is valid");
        self.store.apply_spec(spec).await.expect("spec applies")
    }

    async fn record(&self, id: RolloutId) -> RolloutRecord {
        self.store.get_by_id(id).await.expect("rollout exists")
    }

    /// One engine pass at an injected time, persisted like the reconciler
    /// would persist it.
    async fn pass_at(&self, id: RolloutId, now: DateTime<Utc>) -> Transition {
        let record = self.record(id).await;
        let transition = strategy::reconcile(&record, &self.deps(), now)
            .await
            .expect("engine pass succeeds");
        if transition.status != record.status {
            self.store
                .update_status(id, transition.status.clone(), record.version)
                .await
                .expect("status write succeeds");
        }
        transition
    }

    async fn pass(&self, id: RolloutId) -> Transition {
        self.pass_at(id, Utc::now()).await
    }

    /// Run passes until nothing requeues (or the safety limit trips).
    async fn settle(&self, id: RolloutId) -> RolloutStatus {
        for _ in 0..20 {
            let transition = self.pass(id).await;
            if transition.requeue_after.is_none() {
                return transition.status;
            }
        }
        panic!("rollout did not settle within 20 passes");
    }

    async fn mutate_status(&self, id: RolloutId, mutate: impl FnOnce(&mut RolloutStatus)) {
        let record = self.record(id).await;
        let mut status = record.status.clone();
        mutate(&mut status);
        self.store
            .update_status(id, status, record.version)
            .await
            .expect("status write succeeds");
    }

    async fn stable_rs(&self, id: RolloutId) -> Option<tideway_controller::cluster::ReplicaSet> {
        self.replica_sets(id)
            .await
            .into_iter()
            .find(|rs| rs.role == ReplicaSetRole::Stable)
    }

    async fn canary_rs(&self, id: RolloutId) -> Option<tideway_controller::cluster::ReplicaSet> {
        self.replica_sets(id)
            .await
            .into_iter()
            .find(|rs| rs.role == ReplicaSetRole::Canary)
    }

    async fn replica_sets(&self, id: RolloutId) -> Vec<tideway_controller::cluster::ReplicaSet> {
        self.cluster
            .list_replica_sets(id)
            .await
            .expect("replica sets list")
    }
}

fn error_rate_template() -> AnalysisTemplate {
    AnalysisTemplate {
        name: "error-rate".to_string(),
        metrics: vec![MetricSpec {
            name: "error_rate".to_string(),
            interval_secs: 1,
            count: 1,
            failure_limit: 1,
            args: BTreeMap::new(),
        }],
    }
}

fn canary_spec(image: &str, replicas: i32, steps: Vec<Step>) -> RolloutSpec {
    RolloutSpec {
        name: "checkout".to_string(),
        replicas,
        template: PodTemplate {
            image: image.to_string(),
            command: vec![],
            env: BTreeMap::new(),
        },
        workload_ref: None,
        strategy: Strategy::Canary(CanarySpec { steps }),
        restarted_at: None,
    }
}

fn analysis_step() -> Step {
    Step::Analysis(AnalysisStepSpec {
        template_name: "error-rate".to_string(),
        args: BTreeMap::new(),
    })
}

#[tokio::test]
async fn fresh_rollout_adopts_template_as_stable() {
    let h = Harness::new();
    let record = h
        .apply(canary_spec("app:v1", 5, vec![Step::SetWeight { weight: 20 }]))
        .await;

    let status = h.settle(record.id).await;

    assert_eq!(status.phase, RolloutPhase::Healthy);
    assert_eq!(status.current_step_index, None);
    assert_eq!(status.current_step_weight, 0);
    let expected_hash = record.spec.template_hash().to_string();
    assert_eq!(status.stable_revision.as_deref(), Some(expected_hash.as_str()));

    let stable = h.stable_rs(record.id).await.expect("stable replica set exists");
    assert_eq!(stable.observed_replicas, 5);
    assert!(h.canary_rs(record.id).await.is_none());
}

#[tokio::test]
async fn canary_walkthrough_weight_pause_promote() {
    let h = Harness::new();
    let record = h
        .apply(canary_spec(
            "app:v1",
            5,
            vec![
                Step::SetWeight { weight: 20 },
                Step::Pause {
                    duration_secs: Some(10),
                },
            ],
        ))
        .await;
    h.settle(record.id).await;
    let v1_hash = h.record(record.id).await.spec.template_hash().to_string();

    // New template kicks off the canary sequence.
    let record = h
        .apply(canary_spec(
            "app:v2",
            5,
            vec![
                Step::SetWeight { weight: 20 },
                Step::Pause {
                    duration_secs: Some(10),
                },
            ],
        ))
        .await;
    let v2_hash = record.spec.template_hash().to_string();
    assert_ne!(v1_hash, v2_hash);

    let t0 = Utc::now();
    let transition = h.pass_at(record.id, t0).await;

    // Weight converged, counts split 4/1, step 0 done, pause recorded.
    let status = &transition.status;
    assert_eq!(status.current_step_weight, 20);
    assert_eq!(status.current_step_index, Some(1));
    assert_eq!(status.phase, RolloutPhase::Paused);
    assert!(status.pause_condition(PauseReason::CanaryPauseStep).is_some());
    assert_eq!(h.router.routed_weight(record.id), Some(20));
    assert_eq!(
        h.stable_rs(record.id).await.expect("stable").observed_replicas,
        4
    );
    assert_eq!(
        h.canary_rs(record.id).await.expect("canary").observed_replicas,
        1
    );
    // Requeued for the pause deadline.
    assert_eq!(
        transition.requeue_after,
        Some(std::time::Duration::from_secs(10))
    );

    // Re-reconciling before the deadline holds position.
    let transition = h.pass_at(record.id, t0 + ChronoDuration::seconds(4)).await;
    assert_eq!(transition.status.current_step_index, Some(1));
    assert_eq!(transition.status.phase, RolloutPhase::Paused);

    // After the pause elapses the rollout promotes fully. Elapsed time is
    // measured from the recorded start, so this also covers a controller
    // that slept through the deadline.
    let transition = h.pass_at(record.id, t0 + ChronoDuration::seconds(11)).await;
    assert_eq!(
        transition.status.stable_revision.as_deref(),
        Some(v2_hash.as_str())
    );

    let status = h.settle(record.id).await;
    assert_eq!(status.phase, RolloutPhase::Healthy);
    assert_eq!(status.current_step_index, None);
    assert_eq!(status.current_step_weight, 0);
    assert_eq!(status.canary_revision, None);

    // The v2 replica set is stable at full count; v1 is drained.
    let stable = h.stable_rs(record.id).await.expect("stable");
    assert_eq!(stable.revision, v2_hash);
    assert_eq!(stable.observed_replicas, 5);
    let retired: Vec<_> = h
        .replica_sets(record.id)
        .await
        .into_iter()
        .filter(|rs| rs.role == ReplicaSetRole::Retired)
        .collect();
    assert!(retired.iter().all(|rs| rs.observed_replicas == 0));

    let reasons: Vec<EventReason> = h.sink.captured().iter().map(|e| e.reason).collect();
    assert!(reasons.contains(&EventReason::RolloutCompleted));
    assert!(reasons.contains(&EventReason::RolloutStepCompleted));
    assert!(reasons.contains(&EventReason::RolloutPaused));
}

#[tokio::test]
async fn replica_change_mid_pause_resplits_without_resetting_steps() {
    let h = Harness::new();
    let record = h
        .apply(canary_spec(
            "app:v1",
            5,
            vec![
                Step::SetWeight { weight: 40 },
                Step::Pause { duration_secs: None },
            ],
        ))
        .await;
    h.settle(record.id).await;

    let record = h
        .apply(canary_spec(
            "app:v2",
            5,
            vec![
                Step::SetWeight { weight: 40 },
                Step::Pause { duration_secs: None },
            ],
        ))
        .await;
    let transition = h.pass(record.id).await;
    assert_eq!(transition.status.current_step_index, Some(1));
    assert_eq!(h.canary_rs(record.id).await.expect("canary").observed_replicas, 2);

    // Scale the spec while paused: counts re-derive at the current weight,
    // the step index does not move, and the rollout stays paused.
    let record = h
        .apply(canary_spec(
            "app:v2",
            10,
            vec![
                Step::SetWeight { weight: 40 },
                Step::Pause { duration_secs: None },
            ],
        ))
        .await;
    let transition = h.pass(record.id).await;

    assert_eq!(transition.status.current_step_index, Some(1));
    assert_eq!(transition.status.phase, RolloutPhase::Paused);
    assert_eq!(transition.status.current_step_weight, 40);
    let canary = h.canary_rs(record.id).await.expect("canary");
    let stable = h.stable_rs(record.id).await.expect("stable");
    assert_eq!(canary.observed_replicas, 4);
    assert_eq!(stable.observed_replicas, 6);
    assert_eq!(canary.observed_replicas + stable.observed_replicas, 10);
}

#[tokio::test]
async fn analysis_failure_degrades_and_rolls_back() {
    let h = Harness::new();
    let record = h
        .apply(canary_spec("app:v1", 5, vec![analysis_step()]))
        .await;
    h.settle(record.id).await;
    let v1_hash = h.record(record.id).await.spec.template_hash().to_string();

    let record = h
        .apply(canary_spec(
            "app:v2",
            5,
            vec![Step::SetWeight { weight: 20 }, analysis_step()],
        ))
        .await;

    // Pass 1: weight 20 converges, analysis run starts for step 1.
    let transition = h.pass(record.id).await;
    assert_eq!(transition.status.current_step_index, Some(1));
    let run = transition.status.analysis_runs[0].clone();
    assert_eq!(run.step_index, Some(1));

    // The gate fails its metric.
    h.backend
        .record(run.id, "error_rate", MeasurementStatus::Failed, 0.35);
    let transition = h.pass(record.id).await;
    assert!(transition.status.abort);

    let status = h.settle(record.id).await;
    assert_eq!(status.phase, RolloutPhase::Degraded);
    assert_eq!(status.current_step_weight, 0);
    assert!(status
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("error_rate"));

    // Canary torn down, stable untouched at its pre-rollout count.
    assert_eq!(h.router.routed_weight(record.id), Some(0));
    assert_eq!(h.canary_rs(record.id).await.expect("canary").observed_replicas, 0);
    let stable = h.stable_rs(record.id).await.expect("stable");
    assert_eq!(stable.revision, v1_hash);
    assert_eq!(stable.observed_replicas, 5);

    let warnings: Vec<_> = h
        .sink
        .captured()
        .into_iter()
        .filter(|e| e.reason == EventReason::RolloutAborted)
        .collect();
    assert_eq!(warnings.len(), 1);
}

#[tokio::test]
async fn retry_reattempts_from_step_zero() {
    let h = Harness::new();
    let record = h
        .apply(canary_spec("app:v1", 5, vec![analysis_step()]))
        .await;
    h.settle(record.id).await;

    let record = h
        .apply(canary_spec(
            "app:v2",
            5,
            vec![Step::SetWeight { weight: 20 }, analysis_step()],
        ))
        .await;
    let transition = h.pass(record.id).await;
    let run = transition.status.analysis_runs[0].clone();
    h.backend
        .record(run.id, "error_rate", MeasurementStatus::Failed, 0.5);
    h.pass(record.id).await;
    let status = h.settle(record.id).await;
    assert_eq!(status.phase, RolloutPhase::Degraded);

    // Retry: clear the abort the way the admin API does.
    h.mutate_status(record.id, |status| {
        status.abort = false;
        status.message = None;
        status.phase = RolloutPhase::Progressing;
        status.analysis_runs.clear();
        status.pause_conditions.clear();
    })
    .await;

    // The rollout re-runs from step 0 with a fresh analysis run.
    let transition = h.pass(record.id).await;
    assert_eq!(transition.status.current_step_index, Some(1));
    assert_eq!(transition.status.current_step_weight, 20);
    let retry_run = transition.status.analysis_runs[0].clone();
    assert_ne!(retry_run.id, run.id);

    // This time the gate passes and the rollout completes.
    h.backend
        .record(retry_run.id, "error_rate", MeasurementStatus::Successful, 0.01);
    let status = h.settle(record.id).await;
    assert_eq!(status.phase, RolloutPhase::Healthy);
}

#[tokio::test]
async fn analysis_without_verdict_never_advances() {
    let h = Harness::new();
    let record = h
        .apply(canary_spec("app:v1", 3, vec![analysis_step()]))
        .await;
    h.settle(record.id).await;

    let record = h
        .apply(canary_spec("app:v2", 3, vec![analysis_step()]))
        .await;

    // No measurements ever arrive: the gate holds indefinitely.
    for _ in 0..5 {
        let transition = h.pass(record.id).await;
        assert_eq!(transition.status.current_step_index, Some(0));
        assert_eq!(transition.status.phase, RolloutPhase::Progressing);
        assert!(transition.requeue_after.is_some());
    }
}

#[tokio::test]
async fn promote_completes_the_current_gate_only() {
    let h = Harness::new();
    let record = h
        .apply(canary_spec(
            "app:v1",
            4,
            vec![
                Step::Pause { duration_secs: None },
                Step::Pause { duration_secs: None },
            ],
        ))
        .await;
    h.settle(record.id).await;

    let record = h
        .apply(canary_spec(
            "app:v2",
            4,
            vec![
                Step::Pause { duration_secs: None },
                Step::Pause { duration_secs: None },
            ],
        ))
        .await;
    let transition = h.pass(record.id).await;
    assert_eq!(transition.status.current_step_index, Some(0));
    assert_eq!(transition.status.phase, RolloutPhase::Paused);

    h.mutate_status(record.id, |status| status.promote_requested = true)
        .await;
    let transition = h.pass(record.id).await;

    // One gate cleared, the next indefinite pause holds.
    assert_eq!(transition.status.current_step_index, Some(1));
    assert_eq!(transition.status.phase, RolloutPhase::Paused);
    assert!(!transition.status.promote_requested);
}

#[tokio::test]
async fn promote_full_skips_every_remaining_gate() {
    let h = Harness::new();
    let record = h
        .apply(canary_spec(
            "app:v1",
            4,
            vec![Step::Pause { duration_secs: None }, analysis_step()],
        ))
        .await;
    h.settle(record.id).await;

    let record = h
        .apply(canary_spec(
            "app:v2",
            4,
            vec![Step::Pause { duration_secs: None }, analysis_step()],
        ))
        .await;
    h.pass(record.id).await;

    h.mutate_status(record.id, |status| status.promote_full = true)
        .await;
    let status = h.settle(record.id).await;

    assert_eq!(status.phase, RolloutPhase::Healthy);
    assert_eq!(
        status.stable_revision.as_deref(),
        Some(h.record(record.id).await.spec.template_hash().to_string().as_str())
    );
}

#[tokio::test]
async fn reconcile_is_idempotent_once_settled() {
    let h = Harness::new();
    let record = h
        .apply(canary_spec("app:v1", 5, vec![Step::SetWeight { weight: 50 }]))
        .await;
    h.settle(record.id).await;

    let settled = h.record(record.id).await;
    let events_before = h.sink.captured().len();

    // Two more passes over unchanged inputs: no status write, no events.
    h.pass(record.id).await;
    h.pass(record.id).await;

    let after = h.record(record.id).await;
    assert_eq!(after.version, settled.version);
    assert_eq!(after.status, settled.status);
    assert_eq!(h.sink.captured().len(), events_before);
}

#[tokio::test]
async fn pending_traffic_propagation_holds_status_back() {
    let h = Harness::new();
    let record = h
        .apply(canary_spec("app:v1", 5, vec![Step::SetWeight { weight: 30 }]))
        .await;
    h.settle(record.id).await;

    let record = h
        .apply(canary_spec("app:v2", 5, vec![Step::SetWeight { weight: 30 }]))
        .await;

    // Router accepts but reports propagation pending: status must not
    // record the new weight or advance.
    h.router.delay_applies(1);
    let transition = h.pass(record.id).await;
    assert_eq!(transition.status.current_step_weight, 0);
    assert_eq!(transition.status.current_step_index, Some(0));
    assert!(transition.requeue_after.is_some());

    // Next pass applies and advances.
    let status = h.settle(record.id).await;
    assert_eq!(status.phase, RolloutPhase::Healthy);
}

#[tokio::test]
async fn transient_scale_rejection_leaves_status_untouched() {
    let h = Harness::new();
    let record = h
        .apply(canary_spec("app:v1", 5, vec![Step::SetWeight { weight: 30 }]))
        .await;
    h.settle(record.id).await;
    let before = h.record(record.id).await;

    let record = h
        .apply(canary_spec("app:v2", 5, vec![Step::SetWeight { weight: 30 }]))
        .await;

    h.cluster.fail_next_scale();
    let result = strategy::reconcile(&h.record(record.id).await, &h.deps(), Utc::now()).await;
    let err = result.expect_err("scale rejection surfaces");
    assert!(err.is_transient());

    // Nothing persisted by the failed pass.
    let after = h.record(record.id).await;
    assert_eq!(after.version, record.version);
    assert_eq!(after.status, before.status);

    // The retry converges normally.
    let status = h.settle(record.id).await;
    assert_eq!(status.phase, RolloutPhase::Healthy);
}
