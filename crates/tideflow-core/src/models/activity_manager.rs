use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// How a pending activity affects its process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActivityManagerType {
    /// The process waits until the activity is completed.
    #[default]
    Commit,
    /// Fire-and-forget: the process keeps running.
    Notify,
}

impl ActivityManagerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Notify => "notify",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "notify" => Self::Notify,
            _ => Self::Commit,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Started,
    Completed,
    Interrupted,
    Expired,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "interrupted" => Self::Interrupted,
            "expired" => Self::Expired,
            _ => Self::Started,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ActivityManagerParameters {
    /// Seconds until the activity expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
    /// Dotted paths into the submitted data that must be encrypted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encrypted_data: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_schema: Option<Value>,
    /// Step number the process will be at when this activity resumes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_number: Option<i64>,
}

/// One submission made against an activity manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: String,
    pub actor_data: Value,
    pub data: Value,
    pub created_at: DateTime<Utc>,
}

/// A pending external (usually human) task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityManager {
    pub id: String,
    pub process_id: String,
    pub process_state_id: String,
    #[serde(rename = "type")]
    pub am_type: ActivityManagerType,
    pub status: ActivityStatus,
    /// Action name plus the execution context snapshot.
    pub props: Value,
    pub parameters: ActivityManagerParameters,
    #[serde(default)]
    pub activities: Vec<Activity>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActivityManager {
    pub fn new(
        process_id: &str,
        process_state_id: &str,
        am_type: ActivityManagerType,
        props: Value,
        parameters: ActivityManagerParameters,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            process_id: process_id.to_string(),
            process_state_id: process_state_id.to_string(),
            am_type,
            status: ActivityStatus::Started,
            props,
            parameters,
            activities: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
