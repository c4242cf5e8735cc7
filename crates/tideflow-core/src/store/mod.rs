pub mod activity_manager_store;
pub mod process_state_store;
pub mod process_store;
pub mod timer_store;
pub mod workflow_store;

pub use activity_manager_store::ActivityManagerStore;
pub use process_state_store::ProcessStateStore;
pub use process_store::{ChildProcess, LockProbe, ProcessStore, StepCommit};
pub use timer_store::TimerStore;
pub use workflow_store::WorkflowStore;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Millisecond column to timestamp, falling back to now for corrupt rows.
pub(crate) fn to_dt(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

pub(crate) fn to_opt_dt(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.and_then(|v| Utc.timestamp_millis_opt(v).single())
}

/// JSON text column to value; unreadable text becomes `null`.
pub(crate) fn json_col(text: Option<String>) -> Value {
    text.and_then(|t| serde_json::from_str(&t).ok())
        .unwrap_or(Value::Null)
}

pub(crate) fn opt_json_col(text: Option<String>) -> Option<Value> {
    text.and_then(|t| serde_json::from_str(&t).ok())
}

pub(crate) fn to_json_text(value: &Value) -> String {
    value.to_string()
}
