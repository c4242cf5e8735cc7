//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use tideflow_core::manager;
use tideflow_core::models::{ProcessState, Workflow};
use tideflow_core::{Database, Engine, EngineConfig, EngineInner};

pub fn test_engine() -> Engine {
    test_engine_with(EngineConfig::default())
}

pub fn test_engine_with(config: EngineConfig) -> Engine {
    let db = Database::open_in_memory().expect("Failed to open in-memory database");
    Arc::new(EngineInner::new(db, config))
}

pub async fn register(engine: &Engine, name: &str, blueprint: Value) -> Workflow {
    let spec = serde_json::from_value(blueprint).expect("Blueprint should deserialize");
    manager::register_workflow(engine, name, "", spec)
        .await
        .expect("Workflow should register")
}

pub fn open_lane() -> Value {
    json!({ "id": "any", "rule": { "type": "always" } })
}

/// Start -> set_to_bag -> Finish.
pub fn linear_blueprint() -> Value {
    json!({
        "lanes": [open_lane()],
        "nodes": [
            { "id": "1", "type": "Start", "name": "start", "next": "2", "lane_id": "any" },
            {
                "id": "2", "type": "SystemTask", "category": "set_to_bag", "name": "stamp",
                "next": "3", "lane_id": "any",
                "parameters": { "input": { "stamped_by": { "$ref": "actor_data.id" } } }
            },
            { "id": "3", "type": "Finish", "name": "end", "next": null, "lane_id": "any" }
        ]
    })
}

/// Start -> UserTask -> Finish, with extra user task parameters.
pub fn user_task_blueprint(task_parameters: Value) -> Value {
    let mut parameters = json!({ "action": "APPROVE", "input": { "doc": { "$ref": "bag.doc" } } });
    if let (Some(base), Value::Object(extra)) = (parameters.as_object_mut(), task_parameters) {
        base.extend(extra);
    }
    json!({
        "lanes": [
            open_lane(),
            { "id": "reviewers", "rule": { "type": "has_claim", "claim": "reviewer" } }
        ],
        "nodes": [
            { "id": "1", "type": "Start", "name": "start", "next": "2", "lane_id": "any" },
            {
                "id": "2", "type": "UserTask", "name": "approve", "next": "3",
                "lane_id": "reviewers", "parameters": parameters
            },
            { "id": "3", "type": "Finish", "name": "end", "next": null, "lane_id": "any" }
        ]
    })
}

pub fn reviewer() -> Value {
    json!({ "id": "rita", "claims": ["reviewer"] })
}

pub async fn history(engine: &Engine, process_id: &str) -> Vec<ProcessState> {
    manager::fetch_state_history(engine, process_id)
        .await
        .expect("History should load")
}

/// Step numbers must run 1, 2, 3, ... without gaps.
pub fn assert_gapless(states: &[ProcessState]) {
    let steps: Vec<i64> = states.iter().map(|s| s.step_number).collect();
    let expected: Vec<i64> = (1..=states.len() as i64).collect();
    assert_eq!(steps, expected);
}
