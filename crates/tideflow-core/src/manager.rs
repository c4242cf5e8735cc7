//! Process manager facade.
//!
//! Stateless entry points for outside callers: they resolve a [`Process`]
//! by name or id and delegate to it. Cross-process continuations go through
//! the expected-step-number guard here, so a stale or duplicated
//! notification is dropped instead of advancing the wrong step.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::blueprint::{Blueprint, BlueprintSpec};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::models::{
    Activity, ActivityManager, ActivityStatus, ProcessFilters, ProcessRecord, ProcessState,
    ProcessStatus, Timer, TimerResource, Workflow, ABORT_REASON,
};
use crate::nodes::validate_schema;
use crate::process::{Process, ProcessOutcome};

/// Validate a blueprint and store it as the next version of `name`.
pub async fn register_workflow(
    engine: &Engine,
    name: &str,
    description: &str,
    spec: BlueprintSpec,
) -> Result<Workflow, EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::BadRequest("workflow name is required".to_string()));
    }
    Blueprint::parse(spec.clone())?;
    let workflow = engine
        .workflow_store
        .save(Workflow::new(name, description, spec))
        .await?;
    tracing::info!(workflow = %workflow.name, version = workflow.version, "workflow registered");
    Ok(workflow)
}

pub async fn create_process(
    engine: &Engine,
    workflow: &Workflow,
    actor_data: Value,
    initial_bag: Value,
) -> Result<ProcessOutcome, EngineError> {
    let mut process = Process::new(workflow, &engine.config)?;
    process.create(engine, actor_data, initial_bag).await
}

/// Create a process from the latest version of a workflow.
/// `None` when no workflow has that name.
pub async fn create_process_by_workflow_name(
    engine: &Engine,
    workflow_name: &str,
    actor_data: Value,
    initial_bag: Value,
) -> Result<Option<ProcessOutcome>, EngineError> {
    let Some(workflow) = engine.workflow_store.fetch_by_name(workflow_name).await? else {
        tracing::warn!(workflow = %workflow_name, "no workflow with that name");
        return Ok(None);
    };
    create_process(engine, &workflow, actor_data, initial_bag)
        .await
        .map(Some)
}

pub async fn run_process(
    engine: &Engine,
    process_id: &str,
    actor_data: Value,
    input: Value,
) -> Result<Option<ProcessOutcome>, EngineError> {
    let Some(mut process) = Process::fetch(engine, process_id).await? else {
        return Ok(None);
    };
    process.run(engine, actor_data, input).await.map(Some)
}

/// Resume a delegating parent with its child's result.
///
/// Proceeds only when the parent's next step number equals
/// `expected_step_number`. Returns whether the parent was continued.
pub async fn continue_process(
    engine: &Engine,
    process_id: &str,
    result_data: Value,
    expected_step_number: i64,
) -> Result<bool, EngineError> {
    let Some(mut process) = Process::fetch(engine, process_id).await? else {
        tracing::warn!(process_id, "continue for unknown process dropped");
        return Ok(false);
    };
    let Some(state) = process.state() else {
        return Ok(false);
    };
    if state.step_number + 1 != expected_step_number {
        tracing::debug!(
            process_id,
            step_number = state.step_number,
            expected_step_number,
            "stale continue dropped"
        );
        return Ok(false);
    }
    let actor_data = state.actor_data.clone().unwrap_or_else(|| json!({}));
    process.continue_with(engine, result_data, actor_data).await?;
    Ok(true)
}

/// Per-id result of [`abort_process`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AbortOutcome {
    pub process_id: String,
    pub scheduled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Schedule an immediate abort timer for every id. A failing id does not
/// stop the batch.
pub async fn abort_process(engine: &Engine, process_ids: &[String]) -> Vec<AbortOutcome> {
    let mut outcomes = Vec::with_capacity(process_ids.len());
    for process_id in process_ids {
        let outcome = match schedule_abort(engine, process_id).await {
            Ok(()) => AbortOutcome {
                process_id: process_id.clone(),
                scheduled: true,
                error: None,
            },
            Err(e) => {
                tracing::warn!(process_id = %process_id, error = %e, "abort not scheduled");
                AbortOutcome {
                    process_id: process_id.clone(),
                    scheduled: false,
                    error: Some(e.to_string()),
                }
            }
        };
        outcomes.push(outcome);
    }
    outcomes
}

async fn schedule_abort(engine: &Engine, process_id: &str) -> Result<(), EngineError> {
    let state = engine
        .state_store
        .get_last_state_by_process(process_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("Process {} not found", process_id)))?;
    let timer = Timer::new(
        TimerResource::Process,
        process_id,
        Timer::timeout_from_now(0)?,
        json!({
            "actor_data": state.actor_data.unwrap_or(Value::Null),
            "reason": ABORT_REASON,
        }),
    );
    engine.timer_store.save(timer).await?;
    Ok(())
}

/// Re-run a process with the activities of a completed activity manager,
/// guarded by the step number stamped on that manager.
pub async fn notify_completed_activity_manager(
    engine: &Engine,
    process_id: &str,
    actor_data: Value,
    activities: Value,
    expected_step_number: i64,
) -> Result<Option<ProcessOutcome>, EngineError> {
    let Some(mut process) = Process::fetch(engine, process_id).await? else {
        return Ok(None);
    };
    let step_number = process.state().map(|s| s.step_number).unwrap_or(0);
    if step_number + 1 != expected_step_number {
        tracing::debug!(
            process_id,
            step_number,
            expected_step_number,
            "activity completion arrived for another step"
        );
        return Ok(None);
    }
    process
        .run(engine, actor_data, json!({ "activities": activities }))
        .await
        .map(Some)
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityCompletion {
    pub activity_manager: ActivityManager,
    /// The resumed process, when the completion reached it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessOutcome>,
}

/// Record a submission against a started activity manager and resume its
/// process.
pub async fn complete_activity_manager(
    engine: &Engine,
    activity_manager_id: &str,
    actor_data: Value,
    data: Value,
) -> Result<ActivityCompletion, EngineError> {
    let am = engine
        .activity_manager_store
        .get(activity_manager_id)
        .await?
        .ok_or_else(|| {
            EngineError::NotFound(format!("Activity manager {} not found", activity_manager_id))
        })?;
    if am.status != ActivityStatus::Started {
        return Err(EngineError::InvalidStatus(format!(
            "Activity manager {} is {}",
            am.id,
            am.status.as_str()
        )));
    }
    if let Some(schema) = &am.parameters.activity_schema {
        validate_schema(schema, &data).map_err(EngineError::BadRequest)?;
    }

    let activity = Activity {
        id: Uuid::new_v4().to_string(),
        actor_data: actor_data.clone(),
        data,
        created_at: Utc::now(),
    };
    let am = engine
        .activity_manager_store
        .complete(&am.id, activity)
        .await?
        .ok_or_else(|| {
            EngineError::Conflict(format!(
                "Activity manager {} was closed concurrently",
                activity_manager_id
            ))
        })?;

    let process = match am.parameters.next_step_number {
        Some(expected) => {
            notify_completed_activity_manager(
                engine,
                &am.process_id,
                actor_data,
                serde_json::to_value(&am.activities)?,
                expected,
            )
            .await?
        }
        None => None,
    };
    Ok(ActivityCompletion {
        activity_manager: am,
        process,
    })
}

/// Manually park a process in `PENDING`.
pub async fn set_process_state(
    engine: &Engine,
    process_id: &str,
    bag: Value,
    result: Value,
    next_node_id: Option<String>,
) -> Result<ProcessOutcome, EngineError> {
    let mut process = Process::fetch(engine, process_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("Process {} not found", process_id)))?;
    process.set_state(engine, bag, result, next_node_id).await?;
    Ok(process.outcome())
}

pub async fn fetch_process(
    engine: &Engine,
    process_id: &str,
) -> Result<Option<ProcessRecord>, EngineError> {
    engine.process_store.get(process_id).await
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ListOutcome {
    Processes(Vec<ProcessRecord>),
    Invalid { error: String },
}

/// List processes; malformed filters come back as [`ListOutcome::Invalid`].
pub async fn list_processes(engine: &Engine, filters: Value) -> Result<ListOutcome, EngineError> {
    let filters = match ProcessFilters::from_value(filters) {
        Ok(filters) => filters,
        Err(error) => return Ok(ListOutcome::Invalid { error }),
    };
    let processes = engine.process_store.list(&filters).await?;
    Ok(ListOutcome::Processes(processes))
}

pub async fn fetch_state_history(
    engine: &Engine,
    process_id: &str,
) -> Result<Vec<ProcessState>, EngineError> {
    engine.state_store.get_state_history_by_process(process_id).await
}

pub async fn list_activity_managers(
    engine: &Engine,
    process_id: &str,
) -> Result<Vec<ActivityManager>, EngineError> {
    engine.activity_manager_store.list_for_process(process_id).await
}

/// Current status of a process, if it exists.
pub async fn process_status(
    engine: &Engine,
    process_id: &str,
) -> Result<Option<ProcessStatus>, EngineError> {
    Ok(engine
        .process_store
        .get(process_id)
        .await?
        .and_then(|p| p.current_status))
}
