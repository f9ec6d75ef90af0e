//! Cluster API seam: replica-set observation and mutation.
//!
//! The controller never talks to pods directly; it creates, scales, labels,
//! and deletes replica sets through this interface and observes what the
//! cluster actually runs. A mock implementation backs tests and the dev
//! runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tideway_api::ReplicaSetRole;
use tideway_id::{ReplicaSetId, RolloutId};
use tracing::{debug, info};

use crate::error::{ControllerError, Result};

/// A replica set as observed in the cluster.
#[derive(Debug, Clone)]
pub struct ReplicaSet {
    pub id: ReplicaSetId,
    pub rollout: RolloutId,

    /// Revision hash of the pod template this replica set runs.
    pub revision: String,

    pub role: ReplicaSetRole,

    /// Replica count last requested.
    pub desired_replicas: u32,

    /// Replica count actually running.
    pub observed_replicas: u32,

    pub created_at: DateTime<Utc>,
}

impl ReplicaSet {
    /// Whether the observed count has caught up with the desired count.
    pub fn is_settled(&self) -> bool {
        self.desired_replicas == self.observed_replicas
    }
}

/// Replica-set operations against the cluster.
///
/// Scale requests are idempotent: re-issuing the current desired count is a
/// no-op. Mutation rejections (conflict, quota) surface as `Transient` and
/// are retried on the next reconcile, never treated as an abort condition.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_replica_sets(&self, rollout: RolloutId) -> Result<Vec<ReplicaSet>>;

    async fn create_replica_set(
        &self,
        rollout: RolloutId,
        revision: &str,
        role: ReplicaSetRole,
        replicas: u32,
    ) -> Result<ReplicaSet>;

    async fn scale(&self, id: ReplicaSetId, replicas: u32) -> Result<()>;

    async fn set_role(&self, id: ReplicaSetId, role: ReplicaSetRole) -> Result<()>;

    async fn delete(&self, id: ReplicaSetId) -> Result<()>;
}

/// Mock cluster for testing and development.
///
/// By default scale requests settle immediately (observed = desired). Tests
/// exercising convergence waits can call `hold_convergence()` and later
/// `settle()`; tests exercising quota/conflict rejection can arm
/// `fail_next_scale()`.
#[derive(Default)]
pub struct MockCluster {
    replica_sets: RwLock<HashMap<ReplicaSetId, ReplicaSet>>,
    hold_convergence: AtomicBool,
    fail_next_scale: AtomicBool,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop scale requests from settling until `settle()` is called.
    pub fn hold_convergence(&self) {
        self.hold_convergence.store(true, Ordering::SeqCst);
    }

    /// Copy desired counts into observed counts.
    pub fn settle(&self) {
        if let Ok(mut sets) = self.replica_sets.write() {
            for rs in sets.values_mut() {
                rs.observed_replicas = rs.desired_replicas;
            }
        }
    }

    /// Reject the next scale request with a transient error.
    pub fn fail_next_scale(&self) {
        self.fail_next_scale.store(true, Ordering::SeqCst);
    }

    /// Snapshot a replica set by id.
    pub fn replica_set(&self, id: ReplicaSetId) -> Option<ReplicaSet> {
        self.replica_sets.read().ok()?.get(&id).cloned()
    }

    fn lock_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<ReplicaSetId, ReplicaSet>>> {
        self.replica_sets
            .write()
            .map_err(|_| ControllerError::Internal("cluster lock poisoned".into()))
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn list_replica_sets(&self, rollout: RolloutId) -> Result<Vec<ReplicaSet>> {
        let sets = self
            .replica_sets
            .read()
            .map_err(|_| ControllerError::Internal("cluster lock poisoned".into()))?;
        let mut out: Vec<_> = sets
            .values()
            .filter(|rs| rs.rollout == rollout)
            .cloned()
            .collect();
        out.sort_by_key(|rs| rs.id);
        Ok(out)
    }

    async fn create_replica_set(
        &self,
        rollout: RolloutId,
        revision: &str,
        role: ReplicaSetRole,
        replicas: u32,
    ) -> Result<ReplicaSet> {
        let rs = ReplicaSet {
            id: ReplicaSetId::new(),
            rollout,
            revision: revision.to_string(),
            role,
            desired_replicas: replicas,
            observed_replicas: if self.hold_convergence.load(Ordering::SeqCst) {
                0
            } else {
                replicas
            },
            created_at: Utc::now(),
        };
        info!(
            replica_set = %rs.id,
            rollout = %rollout,
            revision = %revision,
            replicas,
            "[MOCK] Created replica set"
        );
        self.lock_write()?.insert(rs.id, rs.clone());
        Ok(rs)
    }

    async fn scale(&self, id: ReplicaSetId, replicas: u32) -> Result<()> {
        if self.fail_next_scale.swap(false, Ordering::SeqCst) {
            return Err(ControllerError::Transient("scale rejected: quota".into()));
        }

        let mut sets = self.lock_write()?;
        let rs = sets
            .get_mut(&id)
            .ok_or_else(|| ControllerError::NotFound(id.to_string()))?;
        if rs.desired_replicas == replicas && rs.is_settled() {
            return Ok(());
        }
        rs.desired_replicas = replicas;
        if !self.hold_convergence.load(Ordering::SeqCst) {
            rs.observed_replicas = replicas;
        }
        debug!(replica_set = %id, replicas, "[MOCK] Scaled replica set");
        Ok(())
    }

    async fn set_role(&self, id: ReplicaSetId, role: ReplicaSetRole) -> Result<()> {
        let mut sets = self.lock_write()?;
        let rs = sets
            .get_mut(&id)
            .ok_or_else(|| ControllerError::NotFound(id.to_string()))?;
        rs.role = role;
        Ok(())
    }

    async fn delete(&self, id: ReplicaSetId) -> Result<()> {
        self.lock_write()?.remove(&id);
        Ok(())
    }
}
