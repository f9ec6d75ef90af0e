//! Tideway rollout controller library.
//!
//! Drives replicated workloads through declarative canary or blue-green
//! release strategies. One reconcile pass observes the cluster, runs the
//! strategy state machine, and persists the resulting status with an
//! expected-version write.
//!
//! ## Architecture
//!
//! ```text
//! trigger (API write / timer / resync)
//!   └─> WorkQueue (deduplicated, serialized per rollout)
//!         └─> Reconciler worker
//!               └─> strategy engine
//!                     ├── ReplicaSetManager  (scale / promote / prune)
//!                     ├── TrafficWeightController (routing capability)
//!                     ├── AnalysisGate       (start / poll / terminate)
//!                     └── EventRecorder      (notification sink)
//! ```
//!
//! ## Modules
//!
//! - `store`: versioned rollout persistence (memory / SQLite)
//! - `cluster`: replica-set observation and mutation seam
//! - `strategy`: the canary and blue-green state machines
//! - `reconciler`: worker pool, conflict discard, backoff
//! - `api`: admin HTTP surface consumed by `tidectl`

pub mod analysis;
pub mod api;
pub mod cluster;
pub mod config;
pub mod error;
pub mod queue;
pub mod reconciler;
pub mod recorder;
pub mod replicaset;
pub mod store;
pub mod strategy;
pub mod traffic;

// Re-export commonly used types
pub use analysis::{AnalysisBackend, AnalysisGate, MockAnalysisBackend};
pub use cluster::{ClusterApi, MockCluster};
pub use config::Config;
pub use error::{ControllerError, Result};
pub use queue::WorkQueue;
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use recorder::EventRecorder;
pub use replicaset::ReplicaSetManager;
pub use store::{MemoryStore, RolloutRecord, RolloutStore, SqliteStore};
pub use strategy::{EngineDeps, Transition};
pub use traffic::{MockRouter, TrafficRouter, TrafficWeightController};
