//! Deduplicating work queue keyed by rollout identity.
//!
//! Guarantees:
//! - a rollout appears at most once among pending items
//! - at most one reconcile is in flight per rollout: an id handed to a
//!   worker is not handed out again until `done` is called
//! - a trigger arriving while its rollout is in flight marks it dirty and
//!   re-queues it when the in-flight pass finishes, so no trigger is lost
//!
//! Delayed requeues back timed pauses and analysis polling.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tideway_id::RolloutId;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<RolloutId>,
    queued: HashSet<RolloutId>,
    in_flight: HashSet<RolloutId>,
    dirty: HashSet<RolloutId>,
}

/// Work queue for reconcile triggers.
#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    closed: AtomicBool,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a reconcile trigger. Duplicates of an already-pending id are
    /// dropped; triggers for an in-flight id are deferred until it finishes.
    pub fn enqueue(&self, id: RolloutId) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.in_flight.contains(&id) {
            state.dirty.insert(id);
            return;
        }
        if state.queued.insert(id) {
            state.pending.push_back(id);
            self.notify.notify_one();
        }
    }

    /// Enqueue after a delay (timed pause deadlines, poll intervals).
    pub fn enqueue_after(self: &Arc<Self>, id: RolloutId, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(id);
        });
    }

    /// Next rollout to reconcile. Waits until one is available; returns
    /// `None` once the queue is closed and drained.
    pub async fn next(&self) -> Option<RolloutId> {
        loop {
            // Enroll for wake-ups before checking state, so an enqueue or
            // close racing with the check is never missed.
            let notified = self.notify.notified();
            {
                let Ok(mut state) = self.state.lock() else {
                    return None;
                };
                if let Some(id) = state.pending.pop_front() {
                    state.queued.remove(&id);
                    state.in_flight.insert(id);
                    return Some(id);
                }
            }
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    /// Mark an in-flight reconcile finished. A trigger that arrived in the
    /// meantime re-queues the rollout immediately.
    pub fn done(&self, id: RolloutId) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.in_flight.remove(&id);
        if state.dirty.remove(&id) {
            debug!(rollout = %id, "Re-queueing rollout dirtied while in flight");
            if state.queued.insert(id) {
                state.pending.push_back(id);
                self.notify.notify_one();
            }
        }
    }

    /// Close the queue; `next` returns `None` once drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Number of pending triggers.
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.pending.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
