use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::ProcessStatus;
use crate::blueprint::BlueprintSpec;

/// Persisted row of a process, without its state history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessRecord {
    pub id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub blueprint_spec: BlueprintSpec,
    pub current_state_id: Option<String>,
    /// Mirrors the status of the current state.
    pub current_status: Option<ProcessStatus>,
    /// Bumped on every committed step; the compare-and-swap token.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
