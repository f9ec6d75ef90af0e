//! The outer reconciliation loop.
//!
//! A bounded pool of workers drains the deduplicating work queue. For each
//! rollout: load the spec/status pair, run the strategy engine, persist the
//! new status with an expected-version write, and schedule the next wake-up.
//!
//! Failure handling per the error taxonomy:
//! - conflict: the whole pass is discarded and the rollout re-queued so the
//!   next pass starts from a fresh read; results are never merged
//! - transient: re-queued with exponential backoff; status untouched
//! - not-found: the rollout was deleted externally; reconciliation stops

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tideway_id::RolloutId;
use tideway_reconcile::BackoffPolicy;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::ControllerError;
use crate::queue::WorkQueue;
use crate::store::RolloutStore;
use crate::strategy::{self, EngineDeps};

/// Reconciler tuning.
pub struct ReconcilerConfig {
    /// Worker tasks draining the queue.
    pub workers: usize,

    /// Interval of the periodic full resync.
    pub resync_interval: Duration,

    /// Backoff schedule for transient failures.
    pub backoff: BackoffPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resync_interval: Duration::from_secs(300),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Drives rollouts toward their declared strategy.
pub struct Reconciler {
    store: Arc<dyn RolloutStore>,
    queue: Arc<WorkQueue>,
    deps: EngineDeps,
    config: ReconcilerConfig,

    /// Consecutive transient-failure counts, reset on success.
    attempts: Mutex<HashMap<RolloutId, u32>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RolloutStore>,
        queue: Arc<WorkQueue>,
        deps: EngineDeps,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            deps,
            config,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Run workers and the resync ticker until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            workers = self.config.workers,
            resync_interval_secs = self.config.resync_interval.as_secs(),
            "Starting reconciliation loop"
        );

        let mut handles = Vec::new();
        for worker_id in 0..self.config.workers {
            let reconciler = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                reconciler.worker_loop(worker_id).await;
            }));
        }

        let resync = {
            let reconciler = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(reconciler.config.resync_interval);
                loop {
                    tokio::select! {
                        _ = tick.tick() => {
                            if let Err(e) = reconciler.resync_all().await {
                                warn!(error = %e, "Resync failed");
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        // Wait for shutdown, then drain the workers.
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        self.queue.close();
        let _ = resync.await;
        for handle in handles {
            let _ = handle.await;
        }
        info!("Reconciler stopped");
    }

    /// Enqueue every known rollout.
    pub async fn resync_all(&self) -> crate::error::Result<()> {
        let records = self.store.list().await?;
        debug!(count = records.len(), "Resyncing all rollouts");
        for record in records {
            self.queue.enqueue(record.id);
        }
        Ok(())
    }

    async fn worker_loop(&self, worker_id: usize) {
        debug!(worker_id, "Reconcile worker started");
        while let Some(id) = self.queue.next().await {
            self.reconcile_and_requeue(id).await;
            self.queue.done(id);
        }
        debug!(worker_id, "Reconcile worker stopped");
    }

    async fn reconcile_and_requeue(&self, id: RolloutId) {
        match self.reconcile_once(id).await {
            Ok(()) => {
                if let Ok(mut attempts) = self.attempts.lock() {
                    attempts.remove(&id);
                }
            }
            Err(ControllerError::NotFound(_)) => {
                // Deleted externally; nothing left to reconcile.
                debug!(rollout = %id, "Rollout gone, dropping from queue");
            }
            Err(ControllerError::Conflict { rollout, .. }) => {
                // Stale read: discard the pass and start over from fresh
                // state. No backoff; the conflicting writer already made
                // progress.
                debug!(rollout = %rollout, "Status write conflicted, re-reconciling");
                self.queue.enqueue(id);
            }
            Err(e) => {
                let attempt = {
                    let mut attempts = match self.attempts.lock() {
                        Ok(a) => a,
                        Err(_) => return,
                    };
                    let attempt = attempts.entry(id).or_insert(0);
                    *attempt += 1;
                    *attempt
                };
                let delay = self.config.backoff.delay(attempt.saturating_sub(1));
                if e.is_transient() {
                    warn!(
                        rollout = %id,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Transient failure, backing off"
                    );
                } else {
                    error!(rollout = %id, attempt, error = %e, "Reconcile failed");
                }
                self.queue.enqueue_after(id, delay);
            }
        }
    }

    /// One reconcile pass for one rollout.
    pub async fn reconcile_once(&self, id: RolloutId) -> crate::error::Result<()> {
        let record = self.store.get_by_id(id).await?;
        let transition = strategy::reconcile(&record, &self.deps, Utc::now()).await?;

        if transition.status != record.status {
            self.store
                .update_status(id, transition.status, record.version)
                .await?;
        }

        if let Some(delay) = transition.requeue_after {
            if delay.is_zero() {
                self.queue.enqueue(id);
            } else {
                self.queue.enqueue_after(id, delay);
            }
        }
        Ok(())
    }
}
