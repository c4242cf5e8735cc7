//! `tideflow process` — create, drive and inspect processes.

use serde_json::{json, Value};
use tideflow_core::manager::{self, ListOutcome};
use tideflow_core::worker::process_outbox;
use tideflow_core::Engine;

use super::to_json;

pub async fn create(
    engine: &Engine,
    workflow_name: &str,
    actor_data: Value,
    bag: Value,
) -> Result<Value, String> {
    let outcome = manager::create_process_by_workflow_name(engine, workflow_name, actor_data, bag)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Workflow '{}' not found", workflow_name))?;
    to_json(&outcome)
}

/// Run a process, then drain the messages it queued (children to start,
/// parents to resume) so delegations settle within this invocation.
pub async fn run(
    engine: &Engine,
    process_id: &str,
    actor_data: Value,
    input: Value,
) -> Result<Value, String> {
    let outcome = manager::run_process(engine, process_id, actor_data, input)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Process {} not found", process_id))?;
    let handled = process_outbox(engine).await;
    let current_status = manager::process_status(engine, process_id)
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({
        "process": to_json(&outcome)?,
        "messages_handled": handled,
        "current_status": current_status,
    }))
}

pub async fn abort(engine: &Engine, process_ids: &[String]) -> Result<Value, String> {
    let outcomes = manager::abort_process(engine, process_ids).await;
    to_json(&json!({ "aborts": outcomes }))
}

pub async fn list(engine: &Engine, filters: Value) -> Result<Value, String> {
    match manager::list_processes(engine, filters)
        .await
        .map_err(|e| e.to_string())?
    {
        ListOutcome::Processes(processes) => {
            let rows: Vec<Value> = processes
                .iter()
                .map(|p| {
                    json!({
                        "process_id": p.id,
                        "workflow_name": p.workflow_name,
                        "current_status": p.current_status,
                        "created_at": p.created_at,
                        "updated_at": p.updated_at,
                    })
                })
                .collect();
            Ok(json!({ "processes": rows }))
        }
        ListOutcome::Invalid { error } => Err(error),
    }
}

pub async fn get(engine: &Engine, process_id: &str) -> Result<Value, String> {
    let record = manager::fetch_process(engine, process_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Process {} not found", process_id))?;
    to_json(&record)
}

pub async fn history(engine: &Engine, process_id: &str) -> Result<Value, String> {
    let states = manager::fetch_state_history(engine, process_id)
        .await
        .map_err(|e| e.to_string())?;
    if states.is_empty() {
        return Err(format!("Process {} not found", process_id));
    }
    to_json(&json!({ "process_id": process_id, "states": states }))
}

/// `--state` carries `{ "bag": ..., "result": ..., "next_node_id": ... }`.
pub async fn set_state(engine: &Engine, process_id: &str, state: Value) -> Result<Value, String> {
    let bag = state.get("bag").cloned().unwrap_or_else(|| json!({}));
    let result = state.get("result").cloned().unwrap_or_else(|| json!({}));
    let next_node_id = match state.get("next_node_id") {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        Some(other) => return Err(format!("next_node_id must be a node id, got {}", other)),
    };
    let outcome = manager::set_process_state(engine, process_id, bag, result, next_node_id)
        .await
        .map_err(|e| e.to_string())?;
    to_json(&outcome)
}
