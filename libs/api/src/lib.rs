//! # tideway-api
//!
//! The rollout resource schema: declarative spec (replica count, pod
//! template, release strategy) and observed status (step position, traffic
//! weight, revision hashes, pause conditions, analysis-run references).
//!
//! The spec side is owned by users and external tooling; the status side is
//! owned exclusively by the controller's write path. Both serialize with
//! serde and round-trip losslessly.
//!
//! Validation lives here so malformed specs are rejected before anything
//! reaches the strategy engine: unknown strategy kinds and step variants are
//! errors, never silently-skipped steps.

mod analysis;
mod rollout;
mod status;
mod validate;

pub use analysis::*;
pub use rollout::*;
pub use status::*;
pub use validate::*;
