//! Registry record types

use parchive_core::{GroupId, ParameterId};
use serde::{Deserialize, Serialize};

/// A registered parameter group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterGroup {
    pub group_id: GroupId,
    /// Sorted, duplicate-free
    pub parameter_ids: Vec<ParameterId>,
    /// Registration time (milliseconds since epoch)
    pub created_at: i64,
}
