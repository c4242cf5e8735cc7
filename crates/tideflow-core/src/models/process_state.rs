use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::status::ProcessStatus;

/// One recorded step of a process. Never mutated once persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessState {
    pub id: String,
    pub process_id: String,
    pub step_number: i64,
    /// Node that produced this state.
    pub node_id: String,
    /// Node to execute next; `None` at terminal states.
    pub next_node_id: Option<String>,
    pub bag: Value,
    pub external_input: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub status: ProcessStatus,
    pub actor_data: Option<Value>,
    /// Node run time in milliseconds.
    pub time_elapsed: Option<i64>,
    pub engine_id: String,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to record a new step; the id and timestamp are generated.
#[derive(Debug, Clone, Default)]
pub struct NewProcessState {
    pub step_number: i64,
    pub node_id: String,
    pub next_node_id: Option<String>,
    pub bag: Value,
    pub external_input: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub status: Option<ProcessStatus>,
    pub actor_data: Option<Value>,
    pub time_elapsed: Option<i64>,
}

impl ProcessState {
    pub fn new(process_id: &str, engine_id: &str, input: NewProcessState) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            process_id: process_id.to_string(),
            step_number: input.step_number,
            node_id: input.node_id,
            next_node_id: input.next_node_id,
            bag: if input.bag.is_null() {
                Value::Object(Default::default())
            } else {
                input.bag
            },
            external_input: input.external_input,
            result: input.result,
            error: input.error,
            status: input.status.unwrap_or(ProcessStatus::Running),
            actor_data: input.actor_data,
            time_elapsed: input.time_elapsed,
            engine_id: engine_id.to_string(),
            created_at: Utc::now(),
        }
    }

    /// The `parent_process_data` a delegated child carries in its bag, if any.
    pub fn parent_process_data(&self) -> Option<ParentProcessData> {
        self.bag
            .get("parent_process_data")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Serialized form handed to the process-state notifier.
    pub fn to_notification(&self, workflow_name: &str) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.insert(
                "workflow_name".to_string(),
                Value::String(workflow_name.to_string()),
            );
        }
        value
    }
}

/// Link from a delegated child back to the step that spawned it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParentProcessData {
    pub id: String,
    pub expected_step_number: i64,
}
