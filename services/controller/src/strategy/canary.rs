//! Canary state machine.
//!
//! Walks the ordered step list one gate at a time:
//! `set_weight` converges traffic and replica counts, `pause` holds until a
//! deadline or a promote, `analysis` holds until its run reaches a verdict.
//! Reaching the end of the list promotes the canary to stable.
//!
//! Several steps can complete in a single pass (a converged weight followed
//! by an elapsed pause), but a pass never leaves a gate unfinished: each
//! loop iteration either advances the index or returns.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tideway_api::{
    AnalysisPhase, AnalysisRunRef, CanarySpec, PauseCondition, PauseReason, ReplicaSetRole,
    RolloutPhase, RolloutStatus, Step,
};
use tideway_events::{EventReason, RolloutEvent};
use tracing::debug;

use crate::error::{ControllerError, Result};
use crate::store::RolloutRecord;

use super::{advance_step, EngineDeps, REQUEUE_FAST, REQUEUE_NOW};

#[allow(clippy::too_many_arguments)]
pub(super) async fn reconcile_rollout(
    record: &RolloutRecord,
    canary: &CanarySpec,
    deps: &EngineDeps,
    status: &mut RolloutStatus,
    template_hash: &str,
    total: u32,
    now: DateTime<Utc>,
) -> Result<Option<Duration>> {
    let canary_rs = deps
        .replicasets
        .ensure_replica_set(record.id, template_hash, ReplicaSetRole::Canary, 0)
        .await?;
    let observed = deps.replicasets.observe(record.id).await?;
    let Some(stable_rs) = observed.stable else {
        return Err(ControllerError::Internal(
            "no stable replica set during canary rollout".to_string(),
        ));
    };

    let steps = &canary.steps;

    // Replica counts derive from the weight, never the reverse: a replica
    // count edit mid-rollout re-splits at the current weight without
    // touching the step index.
    deps.replicasets
        .reconcile_counts(&stable_rs, &canary_rs, status.current_step_weight, total)
        .await?;

    // `promote --full` skips every remaining gate.
    if status.promote_full {
        super::terminate_active_runs(deps, status).await?;
        status.current_step_index = Some(steps.len() as u32);
        status.promote_full = false;
        status.promote_requested = false;
        status.pause_conditions.clear();
    }

    loop {
        let index = status.current_step_index.unwrap_or(0);

        if index as usize >= steps.len() {
            return promote(record, deps, status, template_hash, total, &canary_rs).await;
        }

        // An explicit promote completes the current gate, whatever it is.
        if status.promote_requested {
            if let Some(run) = status.analysis_run_for_step(index) {
                if !run.phase.is_terminal() {
                    deps.analysis.terminate(run.id).await?;
                }
            }
            status.pause_conditions.clear();
            status.promote_requested = false;
            status.phase = RolloutPhase::Progressing;
            advance_step(status, index);
            deps.recorder
                .event(RolloutEvent::normal(
                    record.id,
                    &record.spec.name,
                    EventReason::RolloutStepCompleted,
                    format!("step {index} skipped by promote"),
                ))
                .await;
            continue;
        }

        match &steps[index as usize] {
            Step::SetWeight { weight } => {
                // Pods first, traffic second: the canary must be able to
                // serve the weight before the router sends it.
                let counts_converged = deps
                    .replicasets
                    .reconcile_counts(&stable_rs, &canary_rs, *weight, total)
                    .await?;
                if !counts_converged {
                    status.phase = RolloutPhase::Progressing;
                    return Ok(Some(REQUEUE_FAST));
                }

                let applied = deps
                    .traffic
                    .converge(record.id, status.current_step_weight, *weight)
                    .await?;
                if !applied {
                    status.phase = RolloutPhase::Progressing;
                    return Ok(Some(REQUEUE_FAST));
                }
                if status.current_step_weight != *weight {
                    deps.recorder
                        .event(RolloutEvent::normal(
                            record.id,
                            &record.spec.name,
                            EventReason::TrafficWeightUpdated,
                            format!("traffic weight set to {weight}"),
                        ))
                        .await;
                }
                status.current_step_weight = *weight;

                complete_step(record, deps, status, index, "weight converged").await;
            }

            Step::Pause { duration_secs } => {
                let Some(condition) = status.pause_condition(PauseReason::CanaryPauseStep) else {
                    status.pause_conditions.push(PauseCondition {
                        reason: PauseReason::CanaryPauseStep,
                        started_at: now,
                    });
                    status.phase = RolloutPhase::Paused;
                    deps.recorder
                        .event(RolloutEvent::normal(
                            record.id,
                            &record.spec.name,
                            EventReason::RolloutPaused,
                            match duration_secs {
                                Some(secs) => format!("paused at step {index} for {secs}s"),
                                None => format!("paused at step {index} until promoted"),
                            },
                        ))
                        .await;
                    return Ok(duration_secs.map(Duration::from_secs));
                };

                let Some(secs) = duration_secs else {
                    // Indefinite pause: only an external promote clears it.
                    status.phase = RolloutPhase::Paused;
                    return Ok(None);
                };

                // Duration counts from the recorded start, so time elapsed
                // while the controller was down is honored after a restart.
                let deadline = condition.started_at + chrono::Duration::seconds(*secs as i64);
                if now < deadline {
                    status.phase = RolloutPhase::Paused;
                    return Ok(Some((deadline - now).to_std().unwrap_or(REQUEUE_FAST)));
                }

                status.pause_conditions.clear();
                status.phase = RolloutPhase::Progressing;
                deps.recorder
                    .event(RolloutEvent::normal(
                        record.id,
                        &record.spec.name,
                        EventReason::RolloutResumed,
                        format!("pause at step {index} elapsed"),
                    ))
                    .await;
                complete_step(record, deps, status, index, "pause elapsed").await;
            }

            Step::Analysis(analysis) => {
                let Some(run) = status.analysis_run_for_step(index) else {
                    let run_id = deps.analysis.start(record.id, analysis).await?;
                    status.analysis_runs.push(AnalysisRunRef {
                        id: run_id,
                        step_index: Some(index),
                        phase: AnalysisPhase::Pending,
                    });
                    status.phase = RolloutPhase::Progressing;
                    deps.recorder
                        .event(RolloutEvent::normal(
                            record.id,
                            &record.spec.name,
                            EventReason::AnalysisRunStarted,
                            format!(
                                "analysis run {run_id} started for step {index} ({})",
                                analysis.template_name
                            ),
                        ))
                        .await;
                    return Ok(Some(deps.analysis.poll_interval(&analysis.template_name)));
                };

                let run_id = run.id;
                let verdict = deps.analysis.poll(run_id).await?;
                if let Some(run) = status
                    .analysis_runs
                    .iter_mut()
                    .find(|r| r.id == run_id)
                {
                    run.phase = verdict.phase;
                }

                match verdict.phase {
                    AnalysisPhase::Successful => {
                        deps.recorder
                            .event(RolloutEvent::normal(
                                record.id,
                                &record.spec.name,
                                EventReason::AnalysisRunCompleted,
                                format!("analysis run {run_id} successful"),
                            ))
                            .await;
                        complete_step(record, deps, status, index, "analysis successful").await;
                    }
                    AnalysisPhase::Failed | AnalysisPhase::Error => {
                        let reason = verdict
                            .message
                            .unwrap_or_else(|| format!("analysis run {run_id} {}", verdict.phase));
                        deps.recorder
                            .event(RolloutEvent::warning(
                                record.id,
                                &record.spec.name,
                                EventReason::AnalysisRunCompleted,
                                reason.clone(),
                            ))
                            .await;
                        status.abort = true;
                        status.message = Some(reason);
                        // The abort branch runs on the next pass.
                        return Ok(Some(REQUEUE_NOW));
                    }
                    AnalysisPhase::Pending
                    | AnalysisPhase::Running
                    | AnalysisPhase::Inconclusive => {
                        status.phase = RolloutPhase::Progressing;
                        return Ok(Some(deps.analysis.poll_interval(&analysis.template_name)));
                    }
                }
            }

            Step::Experiment { name } => {
                // Admission rejects experiment steps; one that slipped
                // through a stale store cannot be silently skipped.
                status.abort = true;
                status.message = Some(format!(
                    "experiment step '{name}' is not supported by this controller"
                ));
                return Ok(Some(REQUEUE_NOW));
            }
        }
    }
}

/// End of the step list: make the canary the new stable.
///
/// Traffic moves to 100% first, the canary scales to the full count, then
/// roles flip. The steady-state branch finishes up on the next pass
/// (traffic back to 0 toward the new stable, old replica set drained).
async fn promote(
    record: &RolloutRecord,
    deps: &EngineDeps,
    status: &mut RolloutStatus,
    template_hash: &str,
    total: u32,
    canary_rs: &crate::cluster::ReplicaSet,
) -> Result<Option<Duration>> {
    // Full count before full traffic.
    deps.replicasets.scale(canary_rs, total).await?;
    if !deps.replicasets.settled_at(canary_rs, total).await? {
        status.phase = RolloutPhase::Progressing;
        return Ok(Some(REQUEUE_FAST));
    }

    let applied = deps
        .traffic
        .converge(record.id, status.current_step_weight, 100)
        .await?;
    if !applied {
        status.phase = RolloutPhase::Progressing;
        return Ok(Some(REQUEUE_FAST));
    }
    status.current_step_weight = 100;

    let observed = deps.replicasets.observe(record.id).await?;
    deps.replicasets
        .promote(observed.stable.as_ref(), canary_rs)
        .await?;
    status.stable_revision = Some(template_hash.to_string());

    debug!(rollout = %record.spec.name, revision = %template_hash, "Canary promoted to stable");
    deps.recorder
        .event(RolloutEvent::normal(
            record.id,
            &record.spec.name,
            EventReason::RolloutCompleted,
            format!("revision {template_hash} fully promoted"),
        ))
        .await;

    // Steady-state reconciliation completes the cleanup.
    Ok(Some(REQUEUE_NOW))
}

/// Mark a step finished and move the pointer forward.
async fn complete_step(
    record: &RolloutRecord,
    deps: &EngineDeps,
    status: &mut RolloutStatus,
    index: u32,
    detail: &str,
) {
    deps.recorder
        .event(RolloutEvent::normal(
            record.id,
            &record.spec.name,
            EventReason::RolloutStepCompleted,
            format!("step {index} completed: {detail}"),
        ))
        .await;
    advance_step(status, index);
}
