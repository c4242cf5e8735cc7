use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::blueprint::BlueprintSpec;

/// A named, versioned workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    /// Assigned by the store: latest version of `name` plus one.
    pub version: i64,
    #[serde(default)]
    pub description: String,
    pub blueprint_spec: BlueprintSpec,
    pub created_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(name: &str, description: &str, blueprint_spec: BlueprintSpec) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            version: 0,
            description: description.to_string(),
            blueprint_spec,
            created_at: Utc::now(),
        }
    }
}
