use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EngineError;

/// The kind of entity a timer fires against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimerResource {
    Process,
    ActivityManager,
}

impl TimerResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "Process",
            Self::ActivityManager => "ActivityManager",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "ActivityManager" => Self::ActivityManager,
            _ => Self::Process,
        }
    }
}

/// Why an abort timer exists; stored in `params.reason`.
pub const ABORT_REASON: &str = "ABORT";

/// A scheduled timeout. Consumed exactly once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Timer {
    pub id: String,
    pub resource_type: TimerResource,
    pub resource_id: String,
    pub expires_at: DateTime<Utc>,
    /// Opaque data for the handler, e.g. `actor_data` and `reason`.
    pub params: Value,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Timer {
    pub fn new(
        resource_type: TimerResource,
        resource_id: &str,
        expires_at: DateTime<Utc>,
        params: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            resource_type,
            resource_id: resource_id.to_string(),
            expires_at,
            params,
            active: true,
            fired_at: None,
            created_at: Utc::now(),
        }
    }

    /// Due time `seconds` from now. Negative timeouts are due immediately;
    /// a timeout past the representable calendar is a `BadRequest`.
    pub fn timeout_from_now(seconds: i64) -> Result<DateTime<Utc>, EngineError> {
        Duration::try_seconds(seconds.max(0))
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .ok_or_else(|| EngineError::BadRequest(format!("timeout {}s is out of range", seconds)))
    }

    pub fn actor_data(&self) -> Value {
        self.params.get("actor_data").cloned().unwrap_or(Value::Null)
    }

    pub fn is_abort(&self) -> bool {
        self.params.get("reason").and_then(Value::as_str) == Some(ABORT_REASON)
    }
}

/// Round fractional seconds up; `None` when the value does not fit an `i64`.
pub fn whole_seconds(seconds: f64) -> Option<i64> {
    let rounded = seconds.ceil();
    (rounded.is_finite() && rounded >= i64::MIN as f64 && rounded < i64::MAX as f64)
        .then_some(rounded as i64)
}
