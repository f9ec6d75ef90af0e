//! # tideway-id
//!
//! Typed identifiers for the resources the rollout controller manages.
//!
//! ## ID Format
//!
//! All resource IDs use a prefixed format: `{prefix}_{ulid}`
//!
//! Examples:
//! - `ro_01HV4Z2WQXKJNM8GPQY6VBKC3D`
//! - `rs_01HV4Z3MXNKPQR9HSTZ7WCLD4E`
//! - `ar_01HV4Z4NYPLTRS0JTUA8XDME5F`
//!
//! IDs are system-generated, time-ordered (ULID), and typed so a replica-set
//! id can never be passed where an analysis-run id is expected. The ULID
//! timestamp gives a creation order, which revision-history pruning relies on
//! to delete oldest-first.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
