//! Typed ID definitions for controller-managed resources.
//!
//! Each ID type has a unique prefix that identifies the resource type.

use crate::define_id;

define_id!(RolloutId, "ro");
define_id!(ReplicaSetId, "rs");
define_id!(AnalysisRunId, "ar");
define_id!(RequestId, "req");
