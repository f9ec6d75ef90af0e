//! Replica-set management.
//!
//! Computes desired stable/canary counts for a target weight and converges
//! the cluster toward them with idempotent scale requests. Also owns role
//! promotion and revision-history pruning.

use std::sync::Arc;

use tideway_api::ReplicaSetRole;
use tideway_id::RolloutId;
use tideway_reconcile::WeightSplit;
use tracing::{debug, info};

use crate::cluster::{ClusterApi, ReplicaSet};
use crate::error::Result;

/// Replica sets of a rollout, classified by role.
#[derive(Debug, Clone, Default)]
pub struct ObservedSets {
    pub stable: Option<ReplicaSet>,
    pub canary: Option<ReplicaSet>,
    pub retired: Vec<ReplicaSet>,
}

/// Manages the replica sets behind one controller instance.
pub struct ReplicaSetManager {
    cluster: Arc<dyn ClusterApi>,
    history_limit: usize,
}

impl ReplicaSetManager {
    pub fn new(cluster: Arc<dyn ClusterApi>, history_limit: usize) -> Self {
        Self {
            cluster,
            history_limit,
        }
    }

    /// Observe and classify the rollout's replica sets.
    ///
    /// Stable and canary are identified by role, not by name pattern; at most
    /// one of each exists because promotion retires the loser atomically.
    pub async fn observe(&self, rollout: RolloutId) -> Result<ObservedSets> {
        let mut observed = ObservedSets::default();
        for rs in self.cluster.list_replica_sets(rollout).await? {
            match rs.role {
                ReplicaSetRole::Stable => observed.stable = Some(rs),
                ReplicaSetRole::Canary => observed.canary = Some(rs),
                ReplicaSetRole::Retired => observed.retired.push(rs),
            }
        }
        Ok(observed)
    }

    /// Find or create the replica set for a revision.
    ///
    /// Matches by revision, not role: a pass replayed after a crash must
    /// find the replica set it already promoted, and re-rolling a retired
    /// revision resurrects its replica set instead of duplicating it.
    pub async fn ensure_replica_set(
        &self,
        rollout: RolloutId,
        revision: &str,
        role: ReplicaSetRole,
        initial_replicas: u32,
    ) -> Result<ReplicaSet> {
        let existing = self
            .cluster
            .list_replica_sets(rollout)
            .await?
            .into_iter()
            .find(|rs| rs.revision == revision);
        if let Some(mut rs) = existing {
            if rs.role == ReplicaSetRole::Retired && role == ReplicaSetRole::Canary {
                self.cluster.set_role(rs.id, role).await?;
                rs.role = role;
            }
            return Ok(rs);
        }
        self.cluster
            .create_replica_set(rollout, revision, role, initial_replicas)
            .await
    }

    /// Converge stable/canary replica counts toward the split implied by
    /// `weight` and `total_replicas`.
    ///
    /// Returns true once both replica sets have settled at the target split.
    /// Re-issuing an already-applied count is a no-op, so calling this every
    /// reconcile is safe.
    pub async fn reconcile_counts(
        &self,
        stable: &ReplicaSet,
        canary: &ReplicaSet,
        weight: i32,
        total_replicas: u32,
    ) -> Result<bool> {
        let split = WeightSplit::for_weight(total_replicas, weight);

        if stable.desired_replicas != split.stable {
            debug!(
                replica_set = %stable.id,
                from = stable.desired_replicas,
                to = split.stable,
                "Scaling stable replica set"
            );
            self.cluster.scale(stable.id, split.stable).await?;
        }
        if canary.desired_replicas != split.canary {
            debug!(
                replica_set = %canary.id,
                from = canary.desired_replicas,
                to = split.canary,
                "Scaling canary replica set"
            );
            self.cluster.scale(canary.id, split.canary).await?;
        }

        let stable_now = self.refreshed(stable).await?;
        let canary_now = self.refreshed(canary).await?;
        Ok(stable_now.is_settled()
            && canary_now.is_settled()
            && split.matches(stable_now.observed_replicas, canary_now.observed_replicas))
    }

    /// Scale a single replica set, idempotently.
    pub async fn scale(&self, rs: &ReplicaSet, replicas: u32) -> Result<()> {
        if rs.desired_replicas != replicas {
            self.cluster.scale(rs.id, replicas).await?;
        }
        Ok(())
    }

    /// Whether a replica set has settled at the given count.
    pub async fn settled_at(&self, rs: &ReplicaSet, replicas: u32) -> Result<bool> {
        let now = self.refreshed(rs).await?;
        Ok(now.desired_replicas == replicas && now.observed_replicas == replicas)
    }

    /// Promote the canary to stable. The previous stable is retired but not
    /// scaled here; the strategy decides when it drains (immediately for
    /// canary, after the grace window for blue-green).
    pub async fn promote(
        &self,
        old_stable: Option<&ReplicaSet>,
        canary: &ReplicaSet,
    ) -> Result<()> {
        self.cluster.set_role(canary.id, ReplicaSetRole::Stable).await?;
        if let Some(old) = old_stable {
            self.cluster.set_role(old.id, ReplicaSetRole::Retired).await?;
        }
        info!(
            replica_set = %canary.id,
            revision = %canary.revision,
            "Promoted canary replica set to stable"
        );
        Ok(())
    }

    /// Retire a replica set without promoting anything (superseded canary).
    pub async fn retire(&self, rs: &ReplicaSet) -> Result<()> {
        self.cluster.scale(rs.id, 0).await?;
        self.cluster.set_role(rs.id, ReplicaSetRole::Retired).await?;
        Ok(())
    }

    /// Delete retired replica sets beyond the configured history limit,
    /// oldest first. The stable and canary replica sets are never pruned.
    pub async fn prune_history(&self, rollout: RolloutId) -> Result<usize> {
        let mut retired = self.observe(rollout).await?.retired;
        if retired.len() <= self.history_limit {
            return Ok(0);
        }
        retired.sort_by_key(|rs| rs.id);

        let excess = retired.len() - self.history_limit;
        let mut pruned = 0;
        for rs in retired.into_iter().take(excess) {
            debug!(replica_set = %rs.id, revision = %rs.revision, "Pruning retired replica set");
            self.cluster.delete(rs.id).await?;
            pruned += 1;
        }
        Ok(pruned)
    }

    async fn refreshed(&self, rs: &ReplicaSet) -> Result<ReplicaSet> {
        let current = self
            .cluster
            .list_replica_sets(rs.rollout)
            .await?
            .into_iter()
            .find(|candidate| candidate.id == rs.id);
        Ok(current.unwrap_or_else(|| rs.clone()))
    }
}
