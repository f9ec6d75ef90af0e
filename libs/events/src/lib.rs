//! # tideway-events
//!
//! Rollout state-transition events and the sink they are delivered to.
//!
//! The reconciler emits one event per observable transition (step completed,
//! replica set scaled, rollout aborted, …). Delivery is fire-and-forget: the
//! core never blocks on a sink and treats sink failures as a logging concern,
//! not a reconcile failure.

mod envelope;
mod reason;
mod sink;

pub use envelope::*;
pub use reason::*;
pub use sink::*;
