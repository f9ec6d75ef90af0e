//! Strategy engine: decides the next status transition for a rollout.
//!
//! One call = one reconcile pass. The engine reads the spec/status pair,
//! consults the replica-set manager, traffic controller, and analysis gate,
//! and returns the new status plus an optional wake-up delay. It never
//! writes status itself; persistence (and conflict handling) is the
//! reconciler's job.
//!
//! Every action is guard-checked against observed state, so re-running a
//! pass over unchanged inputs performs no mutation and emits no events.

mod bluegreen;
mod canary;

use std::time::Duration;

use chrono::{DateTime, Utc};
use tideway_api::{ReplicaSetRef, ReplicaSetRole, RolloutPhase, RolloutStatus, Strategy};
use tideway_events::{EventReason, RolloutEvent};
use tracing::{debug, instrument};

use crate::analysis::AnalysisGate;
use crate::error::Result;
use crate::recorder::EventRecorder;
use crate::replicaset::ReplicaSetManager;
use crate::store::RolloutRecord;
use crate::traffic::TrafficWeightController;

/// Requeue delay while waiting on cluster or router propagation.
pub(crate) const REQUEUE_FAST: Duration = Duration::from_secs(2);

/// Requeue immediately: the pass changed state another branch consumes.
pub(crate) const REQUEUE_NOW: Duration = Duration::ZERO;

/// Collaborators the engine acts through.
pub struct EngineDeps {
    pub replicasets: ReplicaSetManager,
    pub traffic: TrafficWeightController,
    pub analysis: AnalysisGate,
    pub recorder: EventRecorder,
}

/// Result of one reconcile pass.
#[derive(Debug)]
pub struct Transition {
    pub status: RolloutStatus,

    /// When to wake this rollout again; `None` waits for external triggers.
    pub requeue_after: Option<Duration>,
}

/// Compute the next status for a rollout.
#[instrument(skip_all, fields(rollout = %record.spec.name))]
pub async fn reconcile(
    record: &RolloutRecord,
    deps: &EngineDeps,
    now: DateTime<Utc>,
) -> Result<Transition> {
    let mut status = record.status.clone();
    status.observed_generation = record.generation;

    let template_hash = record.spec.template_hash().to_string();
    let total = record.spec.replicas.max(0) as u32;

    // First observation: the initial revision has nothing to canary
    // against, so it is promoted immediately.
    if status.stable_revision.is_none() {
        deps.replicasets
            .ensure_replica_set(record.id, &template_hash, ReplicaSetRole::Stable, total)
            .await?;
        status.stable_revision = Some(template_hash.clone());
        deps.recorder
            .event(RolloutEvent::normal(
                record.id,
                &record.spec.name,
                EventReason::RolloutUpdated,
                format!("adopted initial revision {template_hash}"),
            ))
            .await;
    }

    // A pass replayed after a lost status write may find the promotion
    // already applied in the cluster; adopt the cluster's answer rather
    // than promoting twice.
    if status.stable_revision.as_deref() != Some(template_hash.as_str()) {
        let observed = deps.replicasets.observe(record.id).await?;
        if observed
            .stable
            .as_ref()
            .is_some_and(|rs| rs.revision == template_hash)
        {
            debug!(rollout = %record.spec.name, "Cluster already promoted this revision, syncing status");
            status.stable_revision = Some(template_hash.clone());
        }
    }

    let requeue_after = if status.stable_revision.as_deref() == Some(template_hash.as_str()) {
        reconcile_steady(record, deps, &mut status, &template_hash, total, now).await?
    } else {
        // A revision different from stable is (or becomes) the canary.
        if status.canary_revision.as_deref() != Some(template_hash.as_str()) {
            initialize_revision(record, deps, &mut status, &template_hash).await?;
        }

        if status.abort {
            abort_rollout(record, deps, &mut status, total).await?
        } else {
            match &record.spec.strategy {
                Strategy::Canary(canary) => {
                    canary::reconcile_rollout(
                        record,
                        canary,
                        deps,
                        &mut status,
                        &template_hash,
                        total,
                        now,
                    )
                    .await?
                }
                Strategy::BlueGreen(bg) => {
                    bluegreen::reconcile_rollout(
                        record,
                        bg,
                        deps,
                        &mut status,
                        &template_hash,
                        total,
                        now,
                    )
                    .await?
                }
            }
        }
    };

    refresh_replica_set_refs(record, deps, &mut status).await?;

    Ok(Transition {
        status,
        requeue_after,
    })
}

/// Steady state: the stable revision is the desired revision.
///
/// Handles replica-count convergence, cleanup after a promotion or a spec
/// revert (superseded canary), the blue-green scale-down grace window, and
/// history pruning.
async fn reconcile_steady(
    record: &RolloutRecord,
    deps: &EngineDeps,
    status: &mut RolloutStatus,
    template_hash: &str,
    total: u32,
    now: DateTime<Utc>,
) -> Result<Option<Duration>> {
    let stable = deps
        .replicasets
        .ensure_replica_set(record.id, template_hash, ReplicaSetRole::Stable, total)
        .await?;
    deps.replicasets.scale(&stable, total).await?;

    // Any replica set still in the canary role is superseded once the
    // stable revision is the desired one: tear it down and stop its gates.
    let observed = deps.replicasets.observe(record.id).await?;
    if let Some(canary_rs) = &observed.canary {
        terminate_active_runs(deps, status).await?;
        deps.replicasets.retire(canary_rs).await?;
        debug!(replica_set = %canary_rs.id, "Retired superseded canary replica set");
    }
    status.canary_revision = None;
    status.current_step_index = None;
    status.pause_conditions.clear();
    status.promote_requested = false;
    status.promote_full = false;
    status.abort = false;
    status.preview_available_since = None;

    // All traffic belongs to stable.
    let weight_applied = deps
        .traffic
        .converge(record.id, status.current_step_weight, 0)
        .await?;
    if !weight_applied {
        return Ok(Some(REQUEUE_FAST));
    }
    status.current_step_weight = 0;

    // The replica set retired by a blue-green cutover stays scaled up for
    // the grace window so a rollback is a traffic flip, not a cold start.
    let grace = match &record.spec.strategy {
        Strategy::BlueGreen(bg) => bg.scale_down_grace(),
        Strategy::Canary(_) => Duration::ZERO,
    };
    let mut requeue = None;
    if let Some(cutover_at) = status.cutover_at {
        let deadline = cutover_at
            + chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        if now < deadline {
            requeue = Some((deadline - now).to_std().unwrap_or(REQUEUE_FAST));
        } else {
            status.cutover_at = None;
        }
    }
    if status.cutover_at.is_none() {
        for rs in &observed.retired {
            deps.replicasets.scale(rs, 0).await?;
        }
    }

    if !deps.replicasets.settled_at(&stable, total).await? {
        status.phase = RolloutPhase::Progressing;
        return Ok(Some(REQUEUE_FAST));
    }

    if status.phase != RolloutPhase::Healthy {
        status.phase = RolloutPhase::Healthy;
        status.message = None;
    }
    if status.cutover_at.is_none() {
        deps.replicasets.prune_history(record.id).await?;
    }
    Ok(requeue)
}

/// A new template hash was observed: begin (or restart) a rollout at step 0.
///
/// Only a template change lands here; replica-count-only edits keep the hash
/// and never restart the sequence. A new revision also clears a previous
/// abort: the aborted canary is superseded.
async fn initialize_revision(
    record: &RolloutRecord,
    deps: &EngineDeps,
    status: &mut RolloutStatus,
    template_hash: &str,
) -> Result<()> {
    terminate_active_runs(deps, status).await?;

    // Retire a canary replica set left over from an older revision.
    let observed = deps.replicasets.observe(record.id).await?;
    if let Some(old_canary) = &observed.canary {
        if old_canary.revision != template_hash {
            deps.replicasets.retire(old_canary).await?;
        }
    }

    status.canary_revision = Some(template_hash.to_string());
    status.current_step_index = match record.spec.strategy {
        Strategy::Canary(_) => Some(0),
        Strategy::BlueGreen(_) => None,
    };
    status.analysis_runs.clear();
    status.pause_conditions.clear();
    status.abort = false;
    status.promote_requested = false;
    status.promote_full = false;
    status.preview_available_since = None;
    status.cutover_at = None;
    status.message = None;
    status.phase = RolloutPhase::Progressing;

    deps.recorder
        .event(RolloutEvent::normal(
            record.id,
            &record.spec.name,
            EventReason::RolloutUpdated,
            format!("new revision {template_hash} observed, starting rollout"),
        ))
        .await;
    Ok(())
}

/// Abort branch: converge traffic to zero, tear the canary down, leave the
/// stable replica set serving everything, and mark the rollout Degraded
/// with the triggering reason.
async fn abort_rollout(
    record: &RolloutRecord,
    deps: &EngineDeps,
    status: &mut RolloutStatus,
    total: u32,
) -> Result<Option<Duration>> {
    let newly_degraded = status.phase != RolloutPhase::Degraded;
    status.phase = RolloutPhase::Degraded;
    status.current_step_index = None;
    status.pause_conditions.clear();
    status.promote_requested = false;
    status.promote_full = false;

    if newly_degraded {
        deps.recorder
            .event(RolloutEvent::warning(
                record.id,
                &record.spec.name,
                EventReason::RolloutAborted,
                status
                    .message
                    .clone()
                    .unwrap_or_else(|| "rollout aborted".to_string()),
            ))
            .await;
    }

    terminate_active_runs(deps, status).await?;

    // Traffic first: never route to a replica set about to be torn down.
    let weight_applied = deps
        .traffic
        .converge(record.id, status.current_step_weight, 0)
        .await?;
    if !weight_applied {
        return Ok(Some(REQUEUE_FAST));
    }
    status.current_step_weight = 0;

    let observed = deps.replicasets.observe(record.id).await?;
    if let Some(stable) = &observed.stable {
        deps.replicasets.scale(stable, total).await?;
    }
    let mut settled = true;
    if let Some(canary_rs) = &observed.canary {
        deps.replicasets.scale(canary_rs, 0).await?;
        settled = deps.replicasets.settled_at(canary_rs, 0).await?;
    }
    if let Some(stable) = &observed.stable {
        settled = settled && deps.replicasets.settled_at(stable, total).await?;
    }

    if !settled {
        return Ok(Some(REQUEUE_FAST));
    }
    Ok(None)
}

/// Stop analysis runs that no longer gate anything.
async fn terminate_active_runs(deps: &EngineDeps, status: &mut RolloutStatus) -> Result<()> {
    for run in &mut status.analysis_runs {
        if !run.phase.is_terminal() {
            deps.analysis.terminate(run.id).await?;
            run.phase = tideway_api::AnalysisPhase::Inconclusive;
        }
    }
    Ok(())
}

/// Record the latest observed stable/canary replica sets in status.
async fn refresh_replica_set_refs(
    record: &RolloutRecord,
    deps: &EngineDeps,
    status: &mut RolloutStatus,
) -> Result<()> {
    let observed = deps.replicasets.observe(record.id).await?;
    status.stable_replica_set = observed.stable.as_ref().map(|rs| ReplicaSetRef {
        id: rs.id,
        revision: rs.revision.clone(),
        replicas: rs.observed_replicas,
    });
    status.canary_replica_set = observed.canary.as_ref().map(|rs| ReplicaSetRef {
        id: rs.id,
        revision: rs.revision.clone(),
        replicas: rs.observed_replicas,
    });
    Ok(())
}

/// Advance the step pointer. The only place the index moves forward.
fn advance_step(status: &mut RolloutStatus, completed_index: u32) {
    status.current_step_index = Some(completed_index + 1);
}
