//! `tideflow workflow` — register and inspect workflow blueprints.

use serde_json::{json, Value};
use tideflow_core::{manager, Blueprint, BlueprintSpec, Engine};

use super::to_json;

/// Load a blueprint from a JSON or YAML file.
pub fn load_blueprint(file: &str) -> Result<BlueprintSpec, String> {
    BlueprintSpec::from_file(file).map_err(|e| format!("Failed to load blueprint: {}", e))
}

/// Register `file` as the next version of workflow `name`.
pub async fn register(
    engine: &Engine,
    name: &str,
    file: &str,
    description: Option<&str>,
) -> Result<Value, String> {
    let spec = load_blueprint(file)?;
    let workflow = manager::register_workflow(engine, name, description.unwrap_or(""), spec)
        .await
        .map_err(|e| e.to_string())?;
    Ok(json!({
        "workflow_id": workflow.id,
        "name": workflow.name,
        "version": workflow.version,
    }))
}

/// Check a blueprint file without storing it.
pub fn validate(file: &str) -> Result<Value, String> {
    let spec = load_blueprint(file)?;
    match Blueprint::parse(spec) {
        Ok(blueprint) => Ok(json!({
            "valid": true,
            "nodes": blueprint.spec().nodes.len(),
            "lanes": blueprint.spec().lanes.len(),
        })),
        Err(e) => Ok(json!({ "valid": false, "error": e.to_string() })),
    }
}

pub async fn list(engine: &Engine) -> Result<Value, String> {
    let workflows = engine
        .workflow_store
        .list()
        .await
        .map_err(|e| e.to_string())?;
    let summaries: Vec<Value> = workflows
        .iter()
        .map(|w| {
            json!({
                "workflow_id": w.id,
                "name": w.name,
                "version": w.version,
                "description": w.description,
                "created_at": w.created_at,
            })
        })
        .collect();
    to_json(&json!({ "workflows": summaries }))
}
