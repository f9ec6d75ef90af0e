//! Reconciliation primitives.
//!
//! Pure helpers shared by the rollout reconciler:
//!
//! - **Revision hashing**: detect pod-template changes deterministically.
//! - **Weight math**: split a total replica count between the stable and
//!   canary replica sets for a given traffic weight.
//! - **Backoff**: delay schedule for transient-failure requeues.
//!
//! # Invariants
//!
//! - All functions are deterministic given the same inputs
//! - `WeightSplit` always satisfies `stable + canary == total`
//! - Weights are clamped to [0, 100] before any derivation

use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors from reconciliation helpers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// A declared weight was outside [0, 100].
    #[error("weight {0} out of range [0, 100]")]
    WeightOutOfRange(i32),
}

/// Convergence status for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    /// Observed state matches desired state.
    Converged,

    /// Observed state is moving toward desired state.
    Converging,

    /// Status is unknown (insufficient data).
    Unknown,
}

impl ConvergenceStatus {
    /// Returns true if the resource has converged.
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}

/// A revision hash for deterministic pod-template comparison.
///
/// A rollout is re-initialized at step 0 only when this hash changes;
/// replica-count-only spec edits leave it untouched.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevisionHash(String);

impl RevisionHash {
    /// Compute a revision hash from canonical JSON.
    pub fn from_json(json: &serde_json::Value) -> Self {
        let canonical = canonical_json(json);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let result = hasher.finalize();
        Self(format!("sha256:{}", hex::encode(&result[..16]))) // First 16 bytes (128 bits)
    }

    /// Get the hash string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RevisionHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RevisionHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", escape_json_string(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        serde_json::Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        serde_json::Value::String(s) => format!("\"{}\"", escape_json_string(s)),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
    }
}

fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

/// Clamp a declared traffic weight to [0, 100].
pub fn clamp_weight(weight: i32) -> i32 {
    weight.clamp(0, 100)
}

/// Replica counts for the stable and canary replica sets at a given weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightSplit {
    /// Replicas the stable replica set should run.
    pub stable: u32,

    /// Replicas the canary replica set should run.
    pub canary: u32,
}

impl WeightSplit {
    /// Split `total` replicas for a canary at `weight` percent.
    ///
    /// The canary share rounds up (a 1-replica rollout at weight 20 still
    /// runs one canary pod) and the stable set takes the remainder, so the
    /// counts always sum to `total`.
    pub fn for_weight(total: u32, weight: i32) -> Self {
        let weight = clamp_weight(weight) as u64;
        let canary = ((u64::from(total) * weight).div_ceil(100)) as u32;
        let canary = canary.min(total);
        Self {
            stable: total - canary,
            canary,
        }
    }

    /// Whether observed counts match this split.
    pub fn matches(&self, observed_stable: u32, observed_canary: u32) -> bool {
        self.stable == observed_stable && self.canary == observed_canary
    }
}

/// Exponential backoff configuration for transient-failure requeues.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Calculate delay for the given attempt number.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(16);
        let delay = self.base.as_millis().saturating_mul(1u128 << exp);
        let delay = delay.min(self.max.as_millis());
        Duration::from_millis(delay as u64)
    }
}
