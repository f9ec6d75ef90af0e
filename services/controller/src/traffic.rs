//! Traffic-weight convergence.
//!
//! `TrafficRouter` is the one capability a routing backend must provide:
//! set the canary's share of production traffic. Concrete backends (mesh
//! routing rules, ingress annotations, gateway APIs) plug in behind it; the
//! strategy engine only ever sees this trait.
//!
//! Convergence is a pure function of (current weight, desired weight,
//! router): no hidden state. Status weight is advanced by the caller only
//! after `converge` returns true.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use std::sync::Arc;
use tideway_id::RolloutId;
use tracing::debug;

use crate::error::{ControllerError, Result};

/// Outcome of a weight change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    /// The backend applied and confirmed the weight.
    Applied,

    /// The backend accepted the request but propagation is still pending.
    Pending,
}

/// The routing capability: converge the canary's traffic share.
#[async_trait]
pub trait TrafficRouter: Send + Sync {
    /// Request that `percent` of traffic go to the canary identity.
    async fn set_weight(&self, rollout: RolloutId, percent: i32) -> Result<RouteStatus>;

    /// Confirming read, where the backend supports one. `None` means the
    /// backend cannot report and `Applied` from `set_weight` is trusted.
    async fn current_weight(&self, rollout: RolloutId) -> Result<Option<i32>>;
}

/// Converges traffic weight through whichever router is configured.
pub struct TrafficWeightController {
    router: Arc<dyn TrafficRouter>,
}

impl TrafficWeightController {
    pub fn new(router: Arc<dyn TrafficRouter>) -> Self {
        Self { router }
    }

    /// Drive the routed weight toward `desired`.
    ///
    /// Returns true once the backend has applied (and, where supported,
    /// confirmed) the weight. False means propagation is pending and the
    /// caller should requeue without advancing status.
    ///
    /// The confirming read is consulted first where the backend supports
    /// one, so weight drifted by an external mutation gets re-applied even
    /// when status already records the desired value.
    pub async fn converge(&self, rollout: RolloutId, current: i32, desired: i32) -> Result<bool> {
        let routed = self.router.current_weight(rollout).await?;
        let needs_apply = match routed {
            Some(w) => w != desired,
            None => current != desired,
        };
        if !needs_apply {
            return Ok(true);
        }

        debug!(rollout = %rollout, current, desired, "Converging traffic weight");
        match self.router.set_weight(rollout, desired).await? {
            RouteStatus::Pending => Ok(false),
            RouteStatus::Applied => match self.router.current_weight(rollout).await? {
                Some(w) => Ok(w == desired),
                None => Ok(true),
            },
        }
    }
}

/// Mock router for testing and development.
///
/// Applies weights immediately by default. `delay_applies(n)` makes the next
/// `n` requests report `Pending` (propagation lag); `fail_next()` makes the
/// next request error (backend unavailable).
#[derive(Default)]
pub struct MockRouter {
    weights: RwLock<HashMap<RolloutId, i32>>,
    pending_applies: AtomicU32,
    fail_next: AtomicBool,
}

impl MockRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `Pending` for the next `n` set_weight calls.
    pub fn delay_applies(&self, n: u32) {
        self.pending_applies.store(n, Ordering::SeqCst);
    }

    /// Error the next set_weight call.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// The currently-routed weight for a rollout.
    pub fn routed_weight(&self, rollout: RolloutId) -> Option<i32> {
        self.weights.read().ok()?.get(&rollout).copied()
    }
}

#[async_trait]
impl TrafficRouter for MockRouter {
    async fn set_weight(&self, rollout: RolloutId, percent: i32) -> Result<RouteStatus> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ControllerError::Transient("router unavailable".into()));
        }

        let pending = self.pending_applies.load(Ordering::SeqCst);
        if pending > 0 {
            self.pending_applies.store(pending - 1, Ordering::SeqCst);
            return Ok(RouteStatus::Pending);
        }

        self.weights
            .write()
            .map_err(|_| ControllerError::Internal("router lock poisoned".into()))?
            .insert(rollout, percent);
        Ok(RouteStatus::Applied)
    }

    async fn current_weight(&self, rollout: RolloutId) -> Result<Option<i32>> {
        // No installed rule means everything goes to stable: weight 0.
        Ok(Some(
            self.weights
                .read()
                .map_err(|_| ControllerError::Internal("router lock poisoned".into()))?
                .get(&rollout)
                .copied()
                .unwrap_or(0),
        ))
    }
}
