//! `tideflow activity` — list and complete pending activities.

use serde_json::{json, Value};
use tideflow_core::worker::process_outbox;
use tideflow_core::{manager, Engine};

use super::to_json;

pub async fn list(engine: &Engine, process_id: &str) -> Result<Value, String> {
    let ams = manager::list_activity_managers(engine, process_id)
        .await
        .map_err(|e| e.to_string())?;
    to_json(&json!({ "activity_managers": ams }))
}

pub async fn complete(
    engine: &Engine,
    activity_manager_id: &str,
    actor_data: Value,
    data: Value,
) -> Result<Value, String> {
    let completion =
        manager::complete_activity_manager(engine, activity_manager_id, actor_data, data)
            .await
            .map_err(|e| e.to_string())?;
    process_outbox(engine).await;
    to_json(&completion)
}
