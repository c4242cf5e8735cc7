//! The process aggregate.
//!
//! A [`Process`] owns at most one current [`ProcessState`] plus the parsed
//! blueprint it executes. Every transition appends a new state through
//! [`ProcessStore::commit_step`](crate::store::ProcessStore::commit_step),
//! which only succeeds while the process still points at the state this
//! instance last saw. The in-memory copy is then replaced through
//! `apply_state`, the single place that touches `current_state_id` and
//! `current_status`.
//!
//! Status outcomes such as `FORBIDDEN` are returned as [`ProcessOutcome`]
//! data. `Err` means misuse (wrong status, unknown node) or a storage/lock
//! failure.

mod step_loop;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::blueprint::Blueprint;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::events::EngineEventType;
use crate::models::{
    whole_seconds, NewProcessState, ProcessRecord, ProcessState, ProcessStatus, Timer, TimerResource,
    Workflow,
};
use crate::nodes::{is_representable, validate_schema, NodeContext, NodeExtensions, StepResult};
use crate::store::{ChildProcess, StepCommit};
use crate::value::merge_objects;

const INVALID_RESULT_ERROR: &str = "Node Result is invalid";

/// What a caller gets back from `create` and `run`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessOutcome {
    pub process_id: String,
    pub workflow_name: String,
    pub status: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ProcessState>,
}

impl ProcessOutcome {
    pub fn status(&self) -> ProcessStatus {
        self.status
    }
}

pub struct Process {
    pub id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub created_at: DateTime<Utc>,
    blueprint: Blueprint,
    state: Option<ProcessState>,
    current_state_id: Option<String>,
    current_status: Option<ProcessStatus>,
    version: i64,
    max_step_number: Option<i64>,
}

impl Process {
    /// A fresh, not yet persisted process of `workflow`.
    pub fn new(workflow: &Workflow, config: &EngineConfig) -> Result<Self, EngineError> {
        let blueprint = Blueprint::parse(workflow.blueprint_spec.clone())?;
        Ok(Self::with_blueprint(
            Uuid::new_v4().to_string(),
            workflow.id.clone(),
            workflow.name.clone(),
            blueprint,
            config,
            Utc::now(),
        ))
    }

    fn with_blueprint(
        id: String,
        workflow_id: String,
        workflow_name: String,
        blueprint: Blueprint,
        config: &EngineConfig,
        created_at: DateTime<Utc>,
    ) -> Self {
        let max_step_number = blueprint.max_step_number().or(config.max_step_number);
        Self {
            id,
            workflow_id,
            workflow_name,
            created_at,
            blueprint,
            state: None,
            current_state_id: None,
            current_status: None,
            version: 0,
            max_step_number,
        }
    }

    fn from_record(
        record: ProcessRecord,
        state: Option<ProcessState>,
        config: &EngineConfig,
    ) -> Result<Self, EngineError> {
        let blueprint = Blueprint::parse(record.blueprint_spec)?;
        let mut process = Self::with_blueprint(
            record.id,
            record.workflow_id,
            record.workflow_name,
            blueprint,
            config,
            record.created_at,
        );
        process.version = record.version;
        if let Some(state) = state {
            process.apply_state(state, record.version);
        }
        Ok(process)
    }

    /// Load a process and its current state.
    pub async fn fetch(engine: &Engine, id: &str) -> Result<Option<Self>, EngineError> {
        let Some(record) = engine.process_store.get(id).await? else {
            return Ok(None);
        };
        let state = match &record.current_state_id {
            Some(state_id) => engine.state_store.get(state_id).await?,
            None => None,
        };
        Self::from_record(record, state, &engine.config).map(Some)
    }

    pub fn state(&self) -> Option<&ProcessState> {
        self.state.as_ref()
    }

    pub fn status(&self) -> Option<ProcessStatus> {
        self.state.as_ref().map(|s| s.status)
    }

    pub fn current_state_id(&self) -> Option<&str> {
        self.current_state_id.as_deref()
    }

    pub fn current_status(&self) -> Option<ProcessStatus> {
        self.current_status
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    /// Effective step ceiling: blueprint parameter, else engine config.
    pub fn max_step_number(&self) -> Option<i64> {
        self.max_step_number
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    fn apply_state(&mut self, state: ProcessState, version: i64) {
        self.current_state_id = Some(state.id.clone());
        self.current_status = Some(state.status);
        self.version = version;
        self.state = Some(state);
    }

    /// Re-read the current state from storage.
    async fn refresh(&mut self, engine: &Engine) -> Result<(), EngineError> {
        let record = engine
            .process_store
            .get(&self.id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("Process {} not found", self.id)))?;
        let state = match &record.current_state_id {
            Some(state_id) => engine.state_store.get(state_id).await?,
            None => None,
        };
        match state {
            Some(state) => self.apply_state(state, record.version),
            None => self.version = record.version,
        }
        Ok(())
    }

    fn require_state(&self) -> Result<&ProcessState, EngineError> {
        self.state
            .as_ref()
            .ok_or_else(|| EngineError::InvalidStatus(format!("Process {} has no state", self.id)))
    }

    pub fn outcome(&self) -> ProcessOutcome {
        ProcessOutcome {
            process_id: self.id.clone(),
            workflow_name: self.workflow_name.clone(),
            status: self.status().unwrap_or(ProcessStatus::Unstarted),
            error: self.state.as_ref().and_then(|s| s.error.clone()),
            state: self.state.clone(),
        }
    }

    fn forbidden_outcome(&self) -> ProcessOutcome {
        ProcessOutcome {
            status: ProcessStatus::Forbidden,
            error: None,
            ..self.outcome()
        }
    }

    fn error_outcome(&self, error: impl Into<String>) -> ProcessOutcome {
        ProcessOutcome {
            status: ProcessStatus::Error,
            error: Some(error.into()),
            ..self.outcome()
        }
    }

    fn record(&self, state: &ProcessState) -> ProcessRecord {
        ProcessRecord {
            id: self.id.clone(),
            workflow_id: self.workflow_id.clone(),
            workflow_name: self.workflow_name.clone(),
            blueprint_spec: self.blueprint.spec().clone(),
            current_state_id: Some(state.id.clone()),
            current_status: Some(state.status),
            version: self.version,
            created_at: self.created_at,
            updated_at: Utc::now(),
        }
    }

    fn notify_state(&self, engine: &Engine, actor_data: &Value) {
        let (Some(notifier), Some(state)) = (&engine.state_notifier, &self.state) else {
            return;
        };
        notifier.notify(&state.to_notification(&self.workflow_name), actor_data);
    }

    fn new_state(&self, engine: &Engine, input: NewProcessState) -> ProcessState {
        ProcessState::new(&self.id, &engine.engine_id, input)
    }

    /// A commit guarded by the state and version this instance last saw.
    fn step_commit(&self, state: ProcessState) -> Result<StepCommit, EngineError> {
        let current = self.require_state()?;
        Ok(StepCommit::new(&self.id, &current.id, self.version, state))
    }

    async fn persist(&mut self, engine: &Engine, commit: StepCommit) -> Result<(), EngineError> {
        let state = commit.state.clone();
        let version = engine.process_store.commit_step(commit).await?;
        engine.emit(
            EngineEventType::StateCreated,
            &self.id,
            json!({
                "process_state_id": state.id,
                "step_number": state.step_number,
                "status": state.status,
            }),
        );
        self.apply_state(state, version);
        Ok(())
    }

    fn node_context(
        &self,
        state: &ProcessState,
        external_input: Option<Value>,
        actor_data: &Value,
    ) -> NodeContext {
        let spec = self.blueprint.spec();
        NodeContext {
            bag: state.bag.clone(),
            input: state.result.clone().unwrap_or_else(|| json!({})),
            external_input,
            actor_data: actor_data.clone(),
            environment: spec.environment.clone(),
            parameters: spec.parameters.clone(),
            process_id: self.id.clone(),
        }
    }

    /// Turn a node result into the state recorded at `step_number`.
    fn state_from_result(
        &self,
        engine: &Engine,
        step: StepResult,
        actor_data: &Value,
        result_schema: Option<&Value>,
        step_number: i64,
    ) -> ProcessState {
        let StepResult {
            node_id,
            bag,
            external_input,
            mut result,
            mut error,
            mut status,
            next_node_id,
            time_elapsed,
            ..
        } = step;

        if !is_representable(&result) {
            engine.emit(
                EngineEventType::NodeResultInvalid,
                &self.id,
                json!({ "node_id": node_id }),
            );
            result = json!({});
            error = Some(INVALID_RESULT_ERROR.to_string());
        }
        if error.is_some() {
            status = ProcessStatus::Error;
        }
        if let Some(schema) = result_schema {
            let data = result.get("data").cloned().unwrap_or(Value::Null);
            if let Err(message) = validate_schema(schema, &data) {
                engine.emit(
                    EngineEventType::ResultSchemaViolation,
                    &self.id,
                    json!({ "node_id": node_id, "message": message }),
                );
                status = ProcessStatus::Error;
                error = Some(message);
            }
        }

        self.new_state(
            engine,
            NewProcessState {
                step_number,
                node_id,
                next_node_id,
                bag,
                external_input,
                result: Some(result),
                error,
                status: Some(status),
                actor_data: Some(actor_data.clone()),
                time_elapsed: Some(time_elapsed),
            },
        )
    }

    /// The step-1 state at the single start node this actor may use, or the
    /// `FORBIDDEN`/`ERROR` outcome when there is no such node.
    fn start_state(
        &self,
        engine: &Engine,
        actor_data: &Value,
        initial_bag: Value,
    ) -> Result<ProcessState, ProcessOutcome> {
        let start_node_id = {
            let allowed = self.blueprint.allowed_start_nodes(actor_data, &initial_bag);
            match allowed.as_slice() {
                [] => return Err(self.forbidden_outcome()),
                [node] => node.id().to_string(),
                _ => return Err(self.error_outcome("Multiple start nodes")),
            }
        };

        Ok(self.new_state(
            engine,
            NewProcessState {
                step_number: 1,
                node_id: start_node_id.clone(),
                next_node_id: Some(start_node_id),
                bag: initial_bag,
                external_input: Some(json!({})),
                result: Some(json!({})),
                status: Some(ProcessStatus::Unstarted),
                actor_data: Some(actor_data.clone()),
                ..Default::default()
            },
        ))
    }

    /// Build the record and first state of a process that is written by
    /// someone else's commit (a delegated child).
    pub(crate) fn prepare_child(
        &self,
        engine: &Engine,
        actor_data: &Value,
        initial_bag: Value,
    ) -> Result<ChildProcess, ProcessOutcome> {
        let state = self.start_state(engine, actor_data, initial_bag)?;
        Ok(ChildProcess {
            record: self.record(&state),
            state,
        })
    }

    /// Adopt a first state that has just been persisted.
    fn created(&mut self, engine: &Engine, state: ProcessState, actor_data: &Value) {
        self.apply_state(state, 0);
        self.notify_state(engine, actor_data);
        tracing::info!(
            process_id = %self.id,
            workflow = %self.workflow_name,
            "process created"
        );
        engine.emit(
            EngineEventType::ProcessCreated,
            &self.id,
            json!({ "workflow_name": self.workflow_name }),
        );
    }

    /// Persist step 1 at the single start node this actor may use.
    pub async fn create(
        &mut self,
        engine: &Engine,
        actor_data: Value,
        initial_bag: Value,
    ) -> Result<ProcessOutcome, EngineError> {
        if self.state.is_some() {
            return Err(EngineError::Conflict(format!(
                "Process {} was already created",
                self.id
            )));
        }

        let state = match self.start_state(engine, &actor_data, initial_bag) {
            Ok(state) => state,
            Err(outcome) => return Ok(outcome),
        };
        engine
            .process_store
            .insert_with_state(self.record(&state), state.clone())
            .await?;
        self.created(engine, state, &actor_data);
        Ok(self.outcome())
    }

    /// Execute the current node with `execution_input`, then keep stepping.
    pub async fn run(
        &mut self,
        engine: &Engine,
        actor_data: Value,
        execution_input: Value,
    ) -> Result<ProcessOutcome, EngineError> {
        engine.emit(EngineEventType::ProcessRun, &self.id, json!({}));
        self.refresh(engine).await?;
        let state = self.require_state()?.clone();

        let external_input = match state.status {
            ProcessStatus::Waiting | ProcessStatus::Delegated => execution_input,
            ProcessStatus::Unstarted => json!({}),
            ProcessStatus::Error => {
                let error = state.error.clone().unwrap_or_else(|| "Error".to_string());
                return Ok(self.error_outcome(error));
            }
            _ => return Ok(self.forbidden_outcome()),
        };

        let node = self
            .blueprint
            .fetch_node(&state.node_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("Node not found with id {}", state.node_id)))?;
        let lane_allows = self
            .blueprint
            .lane(node.lane_id())
            .map(|lane| lane.run_rule(&actor_data, &state.bag))
            .unwrap_or(false);
        if !lane_allows {
            tracing::info!(process_id = %self.id, node_id = %node.id(), "lane rule rejected actor");
            return Ok(self.forbidden_outcome());
        }

        let ctx = self.node_context(&state, Some(external_input), &actor_data);
        let step = node.run(&ctx, &NodeExtensions { engine }).await;
        if let Some(error) = &step.error {
            engine.emit(
                EngineEventType::NodeError,
                &self.id,
                json!({
                    "workflow_name": self.workflow_name,
                    "node_id": node.id(),
                    "node_name": node.spec().name,
                    "error": error,
                }),
            );
        }

        let mut new_state = self.state_from_result(
            engine,
            step,
            &actor_data,
            node.spec().result_schema.as_ref(),
            state.step_number + 1,
        );
        let process_due = if new_state.status == ProcessStatus::Running && new_state.step_number == 2 {
            result_timeout(new_state.result.as_ref())
                .and_then(|seconds| due_or_fail(&mut new_state, seconds))
        } else {
            None
        };

        let mut commit = self.step_commit(new_state)?;
        if let Some(due) = process_due {
            commit.timers.push(Timer::new(
                TimerResource::Process,
                &self.id,
                due,
                json!({ "actor_data": actor_data }),
            ));
        }
        let timer_ids: Vec<String> = commit.timers.iter().map(|t| t.id.clone()).collect();
        self.persist(engine, commit).await?;
        self.notify_state(engine, &actor_data);
        for timer_id in timer_ids {
            engine.emit(
                EngineEventType::TimerCreated,
                &self.id,
                json!({ "timer_id": timer_id }),
            );
        }

        self.execution_loop(engine, &actor_data).await?;
        Ok(self.outcome())
    }

    /// Resume after a delegated child finished, merging its result.
    pub async fn continue_with(
        &mut self,
        engine: &Engine,
        result_data: Value,
        actor_data: Value,
    ) -> Result<(), EngineError> {
        engine.emit(EngineEventType::ProcessContinue, &self.id, json!({}));
        if self.state.is_none() {
            self.refresh(engine).await?;
        }
        let state = self.require_state()?.clone();
        let Some(node) = self.blueprint.fetch_node(&state.node_id).cloned() else {
            return Ok(());
        };
        if state.status == ProcessStatus::Finished {
            return Ok(());
        }

        if state.status != ProcessStatus::Running {
            let merged = merge_objects(state.result.as_ref().unwrap_or(&Value::Null), &result_data);
            let next_node_id = node.next(Some(&merged));
            let resumed = self.new_state(
                engine,
                NewProcessState {
                    step_number: state.step_number + 1,
                    node_id: node.id().to_string(),
                    next_node_id,
                    bag: state.bag.clone(),
                    external_input: None,
                    result: Some(merged),
                    status: Some(ProcessStatus::Running),
                    actor_data: Some(actor_data.clone()),
                    ..Default::default()
                },
            );
            let commit = self.step_commit(resumed)?;
            self.persist(engine, commit).await?;
            self.notify_state(engine, &json!({}));
        }

        self.execution_loop(engine, &actor_data).await
    }

    /// Continue a `PENDING` process at its `next_node_id`.
    pub async fn run_pending_process(
        &mut self,
        engine: &Engine,
        actor_data: Value,
    ) -> Result<(), EngineError> {
        engine.emit(EngineEventType::ProcessRunPending, &self.id, json!({}));
        self.refresh(engine).await?;
        let state = self.require_state()?;
        if state.status != ProcessStatus::Pending {
            return Err(EngineError::InvalidStatus(format!(
                "Process on invalid status {}",
                state.status
            )));
        }
        let next_node_id = state.next_node_id.clone().unwrap_or_default();
        if self.blueprint.fetch_node(&next_node_id).is_none() {
            return Err(EngineError::NotFound(format!(
                "Node not found with id {}",
                next_node_id
            )));
        }

        // The loop keys its lock on the state id, so only the in-memory status moves.
        if let Some(state) = self.state.as_mut() {
            state.status = ProcessStatus::Running;
        }
        self.current_status = Some(ProcessStatus::Running);
        self.execution_loop(engine, &actor_data).await
    }

    pub async fn expire_process(&mut self, engine: &Engine) -> Result<(), EngineError> {
        engine.emit(EngineEventType::ProcessExpiring, &self.id, json!({}));
        self.write_terminal_state(engine, ProcessStatus::Expired).await
    }

    pub async fn abort(&mut self, engine: &Engine) -> Result<(), EngineError> {
        engine.emit(EngineEventType::ProcessAborting, &self.id, json!({}));
        self.write_terminal_state(engine, ProcessStatus::Interrupted)
            .await
    }

    async fn write_terminal_state(
        &mut self,
        engine: &Engine,
        status: ProcessStatus,
    ) -> Result<(), EngineError> {
        let node_id = self.require_state()?.node_id.clone();
        let step_number = engine.state_store.get_last_step_number(&self.id).await? + 1;
        let terminal = self.new_state(
            engine,
            NewProcessState {
                step_number,
                node_id,
                bag: json!({}),
                status: Some(status),
                ..Default::default()
            },
        );
        let commit = self.step_commit(terminal)?;
        self.persist(engine, commit).await?;
        let interrupted = engine
            .activity_manager_store
            .interrupt_for_process(&self.id)
            .await?;
        tracing::info!(
            process_id = %self.id,
            status = %status,
            interrupted_activity_managers = interrupted,
            "process terminated"
        );
        self.notify_state(engine, &Value::Null);
        Ok(())
    }

    /// Manually park the process in `PENDING` at the next step.
    pub async fn set_state(
        &mut self,
        engine: &Engine,
        bag: Value,
        result: Value,
        next_node_id: Option<String>,
    ) -> Result<(), EngineError> {
        engine.emit(EngineEventType::ProcessStateSet, &self.id, json!({}));
        self.refresh(engine).await?;
        let state = self.require_state()?.clone();
        if matches!(state.status, ProcessStatus::Finished | ProcessStatus::Interrupted) {
            return Err(EngineError::InvalidStatus(format!(
                "Process on invalid status {}",
                state.status
            )));
        }

        let pending = self.new_state(
            engine,
            NewProcessState {
                step_number: state.step_number + 1,
                node_id: state.node_id.clone(),
                next_node_id,
                bag,
                external_input: Some(json!({})),
                result: Some(result),
                status: Some(ProcessStatus::Pending),
                ..Default::default()
            },
        );
        let commit = self.step_commit(pending)?;
        self.persist(engine, commit).await?;
        self.notify_state(engine, &Value::Null);
        Ok(())
    }

    /// React to a process timer firing.
    pub async fn timeout(&mut self, engine: &Engine, timer: &Timer) -> Result<(), EngineError> {
        engine.emit(
            EngineEventType::ProcessTimeout,
            &self.id,
            json!({ "timer_id": timer.id }),
        );
        self.refresh(engine).await?;
        match self.status() {
            Some(ProcessStatus::Pending) => self.run_pending_process(engine, timer.actor_data()).await,
            Some(ProcessStatus::Waiting) | Some(ProcessStatus::Delegated) => {
                self.expire_process(engine).await
            }
            Some(ProcessStatus::Running) => {
                tracing::info!(
                    process_id = %self.id,
                    timer_id = %timer.id,
                    "cannot expire a running process"
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// `result.timeout` in seconds, as a number or numeric string.
fn result_timeout(result: Option<&Value>) -> Option<i64> {
    match result?.get("timeout")? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(whole_seconds)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Due time of a timer scheduled by `state`. When the timeout cannot be
/// scheduled the state is turned into an ERROR step carrying the reason.
fn due_or_fail(state: &mut ProcessState, seconds: i64) -> Option<DateTime<Utc>> {
    match Timer::timeout_from_now(seconds) {
        Ok(due) => Some(due),
        Err(e) => {
            state.status = ProcessStatus::Error;
            state.error = Some(e.to_string());
            None
        }
    }
}
