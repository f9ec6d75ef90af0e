//! Controller error taxonomy.
//!
//! Four classes matter to the reconciler:
//! - `Validation`: malformed spec, rejected at admission, never reaches the
//!   strategy engine.
//! - `Conflict`: optimistic-concurrency mismatch on a status write; the pass
//!   is discarded and re-run from a fresh read, never merged.
//! - `Transient`: cluster API or backend unavailable; retried with backoff,
//!   never advances or regresses the step index, invisible to status.
//! - `NotFound`: the rollout was deleted externally; reconciliation stops.
//!
//! Gate failures (analysis Failed/Error) are not errors here: they are
//! status transitions handled inside the strategy engine.

use thiserror::Error;
use tideway_api::ValidationError;

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, ControllerError>;

/// Errors that can occur during reconciliation and store access.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("rollout not found: {0}")]
    NotFound(String),

    #[error("conflict writing {rollout}: expected version {expected}, found {actual}")]
    Conflict {
        rollout: String,
        expected: i64,
        actual: i64,
    },

    #[error("transient infrastructure error: {0}")]
    Transient(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ControllerError {
    /// Whether the reconciler should retry this pass with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, ControllerError::Transient(_))
    }

    /// Whether this is a stale-version write rejection.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Conflict { .. })
    }
}

impl From<rusqlite::Error> for ControllerError {
    fn from(e: rusqlite::Error) -> Self {
        ControllerError::Transient(format!("sqlite: {e}"))
    }
}
