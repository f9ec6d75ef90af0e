//! Blue-green state machine.
//!
//! The preview replica set is staged at full scale with 0% of production
//! traffic. Once it is available (and the pre-promotion analysis passes, if
//! configured), promotion waits for an explicit promote or the auto-promote
//! deadline, then traffic cuts over in a single 0→100 transition with no
//! intermediate weights. The previous active replica set stays scaled up
//! through a grace window so rollback is a traffic flip.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tideway_api::{
    AnalysisPhase, AnalysisRunRef, BlueGreenSpec, PauseCondition, PauseReason, ReplicaSetRole,
    RolloutPhase, RolloutStatus,
};
use tideway_events::{EventReason, RolloutEvent};
use tracing::debug;

use crate::error::{ControllerError, Result};
use crate::store::RolloutRecord;

use super::{EngineDeps, REQUEUE_FAST, REQUEUE_NOW};

#[allow(clippy::too_many_arguments)]
pub(super) async fn reconcile_rollout(
    record: &RolloutRecord,
    bg: &BlueGreenSpec,
    deps: &EngineDeps,
    status: &mut RolloutStatus,
    template_hash: &str,
    total: u32,
    now: DateTime<Utc>,
) -> Result<Option<Duration>> {
    let preview = deps
        .replicasets
        .ensure_replica_set(record.id, template_hash, ReplicaSetRole::Canary, total)
        .await?;

    // Stage the preview at full scale before anything else.
    deps.replicasets.scale(&preview, total).await?;
    if !deps.replicasets.settled_at(&preview, total).await? {
        status.phase = RolloutPhase::Progressing;
        status.preview_available_since = None;
        return Ok(Some(REQUEUE_FAST));
    }
    if status.preview_available_since.is_none() {
        status.preview_available_since = Some(now);
        debug!(rollout = %record.spec.name, "Blue-green preview fully available");
    }

    // Pre-promotion analysis gates the cutover when configured.
    if let Some(analysis) = &bg.pre_promotion_analysis {
        let Some(run) = status.analysis_runs.iter().find(|r| r.step_index.is_none()) else {
            let run_id = deps.analysis.start(record.id, analysis).await?;
            status.analysis_runs.push(AnalysisRunRef {
                id: run_id,
                step_index: None,
                phase: AnalysisPhase::Pending,
            });
            status.phase = RolloutPhase::Progressing;
            deps.recorder
                .event(RolloutEvent::normal(
                    record.id,
                    &record.spec.name,
                    EventReason::AnalysisRunStarted,
                    format!(
                        "pre-promotion analysis run {run_id} started ({})",
                        analysis.template_name
                    ),
                ))
                .await;
            return Ok(Some(deps.analysis.poll_interval(&analysis.template_name)));
        };

        let run_id = run.id;
        let previous_phase = run.phase;
        if !previous_phase.is_terminal() {
            let verdict = deps.analysis.poll(run_id).await?;
            if let Some(run) = status.analysis_runs.iter_mut().find(|r| r.id == run_id) {
                run.phase = verdict.phase;
            }
            match verdict.phase {
                AnalysisPhase::Successful => {
                    deps.recorder
                        .event(RolloutEvent::normal(
                            record.id,
                            &record.spec.name,
                            EventReason::AnalysisRunCompleted,
                            format!("pre-promotion analysis run {run_id} successful"),
                        ))
                        .await;
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
                    return Ok(Some(REQUEUE_NOW));
                }
                AnalysisPhase::Pending | AnalysisPhase::Running | AnalysisPhase::Inconclusive => {
                    status.phase = RolloutPhase::Progressing;
                    return Ok(Some(deps.analysis.poll_interval(&analysis.template_name)));
                }
            }
        }

        // Promotion is gated on a Successful verdict; a run that ended
        // Inconclusive holds the preview rather than waving it through.
        let gate_passed = status
            .analysis_runs
            .iter()
            .find(|r| r.step_index.is_none())
            .map(|r| r.phase == AnalysisPhase::Successful)
            .unwrap_or(false);
        if !gate_passed {
            status.phase = RolloutPhase::Progressing;
            return Ok(Some(deps.analysis.poll_interval(&analysis.template_name)));
        }
    }

    // Promotion gate: explicit promote, or the auto-promote deadline.
    let mut approved = status.promote_requested || status.promote_full;
    let mut requeue = None;
    if !approved {
        if let (Some(auto_secs), Some(available_since)) =
            (bg.auto_promote_after_secs, status.preview_available_since)
        {
            let deadline = available_since + chrono::Duration::seconds(auto_secs as i64);
            if now >= deadline {
                approved = true;
            } else {
                requeue = Some((deadline - now).to_std().unwrap_or(REQUEUE_FAST));
            }
        }
    }

    if !approved {
        if status
            .pause_condition(PauseReason::BlueGreenPreview)
            .is_none()
        {
            status.pause_conditions.push(PauseCondition {
                reason: PauseReason::BlueGreenPreview,
                started_at: now,
            });
            deps.recorder
                .event(RolloutEvent::normal(
                    record.id,
                    &record.spec.name,
                    EventReason::RolloutPaused,
                    match bg.auto_promote_after_secs {
                        Some(secs) => {
                            format!("preview staged, auto-promoting in {secs}s unless promoted")
                        }
                        None => "preview staged, awaiting promotion".to_string(),
                    },
                ))
                .await;
        }
        status.phase = RolloutPhase::Paused;
        return Ok(requeue);
    }

    cutover(record, deps, status, template_hash, &preview, now).await
}

/// The atomic traffic flip: 0→100 in one transition, then role promotion.
async fn cutover(
    record: &RolloutRecord,
    deps: &EngineDeps,
    status: &mut RolloutStatus,
    template_hash: &str,
    preview: &crate::cluster::ReplicaSet,
    now: DateTime<Utc>,
) -> Result<Option<Duration>> {
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
    let old_stable = observed.stable.as_ref();
    if old_stable.map(|rs| rs.id) == Some(preview.id) {
        return Err(ControllerError::Internal(
            "preview replica set is already stable".to_string(),
        ));
    }
    deps.replicasets.promote(old_stable, preview).await?;

    status.stable_revision = Some(template_hash.to_string());
    status.cutover_at = Some(now);
    status.preview_available_since = None;
    status.pause_conditions.clear();
    status.promote_requested = false;
    status.promote_full = false;

    deps.recorder
        .event(RolloutEvent::normal(
            record.id,
            &record.spec.name,
            EventReason::RolloutCompleted,
            format!("traffic cut over to revision {template_hash}"),
        ))
        .await;

    // Steady-state reconciliation settles traffic back onto the new stable
    // and drains the old replica set after the grace window.
    Ok(Some(REQUEUE_NOW))
}
