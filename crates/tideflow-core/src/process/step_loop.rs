//! The step loop: advance a `RUNNING` process one node at a time until it
//! reaches any other status.
//!
//! Each iteration probes the lock, runs the next node and commits the new
//! state together with its activity manager and timers. Messages for other
//! processes (run a child, resume a parent) are dispatched only after that
//! commit succeeded.

use serde_json::{json, Value};

use super::Process;
use crate::engine::{Engine, EngineMessage};
use crate::error::EngineError;
use crate::events::EngineEventType;
use crate::models::{ActivityManager, ProcessState, ProcessStatus, Timer, TimerResource};
use crate::nodes::NodeExtensions;
use crate::store::ChildProcess;

#[derive(Default)]
struct StepOutcome {
    activity_manager: Option<ActivityManager>,
}

struct PreparedChild {
    process: Process,
    child: ChildProcess,
    actor_data: Value,
}

impl Process {
    pub(crate) async fn execution_loop(
        &mut self,
        engine: &Engine,
        actor_data: &Value,
    ) -> Result<(), EngineError> {
        // An activity manager created while still RUNNING is announced one
        // iteration later; the one that parks the loop is announced last.
        let mut deferred: Option<ActivityManager> = None;
        let mut parked: Option<ActivityManager> = None;

        while self.status() == Some(ProcessStatus::Running) {
            engine.emit(
                EngineEventType::TransactionBegin,
                &self.id,
                json!({ "engine_id": engine.engine_id }),
            );
            match self.advance(engine, actor_data).await {
                Ok(step) => {
                    engine.emit(EngineEventType::TransactionCommit, &self.id, json!({}));
                    if let Some(previous) = deferred.take() {
                        self.notify_activity_manager(engine, &previous);
                    }
                    if let Some(am) = step.activity_manager {
                        if self.status() == Some(ProcessStatus::Running) {
                            deferred = Some(am);
                        } else {
                            parked = Some(am);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(process_id = %self.id, error = %e, "step attempt rolled back");
                    engine.emit(
                        EngineEventType::TransactionRollback,
                        &self.id,
                        json!({ "error": e.to_string() }),
                    );
                    self.refresh(engine).await?;
                    break;
                }
            }
        }

        if let Some(am) = deferred.take() {
            self.notify_activity_manager(engine, &am);
        }
        if let Some(am) = parked.take() {
            self.notify_activity_manager(engine, &am);
        }
        // A refreshed status may be terminal after another worker won the step.
        self.settle_activity_managers(engine).await?;

        engine.emit(
            EngineEventType::ExecutionLoopLeft,
            &self.id,
            json!({ "status": self.status() }),
        );
        Ok(())
    }

    /// One iteration. Any `Err` means nothing was committed.
    ///
    /// When `next_step_number` reaches the step ceiling no node runs: the
    /// EXPIRED marker itself is written at `next_step_number`, so the
    /// ceiling is the last step number a process can hold.
    async fn advance(
        &mut self,
        engine: &Engine,
        actor_data: &Value,
    ) -> Result<StepOutcome, EngineError> {
        let current = self.require_state()?.clone();
        let probe = engine
            .process_store
            .lock_probe(&self.id, &current.id)
            .await?
            .ok_or_else(|| {
                EngineError::LockUnavailable(format!(
                    "No process found for lock, process_id [{}] current_state_id [{}]",
                    self.id, current.id
                ))
            })?;
        engine.emit(
            EngineEventType::LockAcquired,
            &self.id,
            json!({ "process_state_id": current.id }),
        );

        let next_step_number = probe.next_step_number;
        if let Some(ceiling) = self.max_step_number {
            if next_step_number >= ceiling {
                tracing::warn!(
                    process_id = %self.id,
                    step_number = next_step_number,
                    ceiling,
                    "step ceiling reached"
                );
                self.expire_process(engine).await?;
                return Ok(StepOutcome::default());
            }
        }

        let next_node_id = current.next_node_id.clone().unwrap_or_default();
        let node = self
            .blueprint
            .fetch_node(&next_node_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("Node not found with id {}", next_node_id)))?;

        engine.emit(
            EngineEventType::NodeRunStarted,
            &self.id,
            json!({
                "node_id": node.id(),
                "node_type": node.spec().node_type,
                "category": node.spec().category,
                "name": node.spec().name,
            }),
        );
        let ctx = self.node_context(&current, None, actor_data);
        let step = node.run(&ctx, &NodeExtensions { engine }).await;
        engine.emit(
            EngineEventType::NodeRunFinished,
            &self.id,
            json!({ "node_id": node.id(), "status": step.status, "time_elapsed": step.time_elapsed }),
        );
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

        let mut am_request = step.activity_manager.clone();
        let activity_schema = step.activity_schema.clone();
        let child_workflow = step.workflow_name.clone();
        let child_actor_data = step.actor_data.clone();
        let mut new_state = self.state_from_result(
            engine,
            step,
            actor_data,
            node.spec().result_schema.as_ref(),
            next_step_number,
        );

        // Due times are resolved before the commit so an unschedulable
        // timeout lands as an ERROR step instead of a half-written one.
        let mut pending_due = None;
        let mut am_due = None;
        if new_state.status == ProcessStatus::Pending {
            if let Some(seconds) = super::result_timeout(new_state.result.as_ref()) {
                pending_due = super::due_or_fail(&mut new_state, seconds);
            }
        } else if let Some(seconds) = am_request.as_ref().and_then(|r| r.parameters.timeout) {
            am_due = super::due_or_fail(&mut new_state, seconds);
        }
        if new_state.status == ProcessStatus::Error {
            am_request = None;
        }

        let mut commit = self.step_commit(new_state.clone())?;
        let mut messages = Vec::new();
        let mut activity_manager = None;
        let mut prepared_child = None;

        if let Some(due) = pending_due {
            commit.timers.push(Timer::new(
                TimerResource::Process,
                &self.id,
                due,
                json!({ "actor_data": actor_data }),
            ));
        } else if let Some(request) = am_request {
            let mut parameters = request.parameters;
            parameters.next_step_number = Some(next_step_number + 1);
            parameters.activity_schema = activity_schema;
            let am = ActivityManager::new(
                &self.id,
                &new_state.id,
                request.am_type,
                request.props,
                parameters,
            );
            if let Some(due) = am_due {
                commit.timers.push(Timer::new(
                    TimerResource::ActivityManager,
                    &am.id,
                    due,
                    json!({ "actor_data": actor_data }),
                ));
            }
            commit.activity_manager = Some(am.clone());
            activity_manager = Some(am);
        } else if new_state.status == ProcessStatus::Delegated {
            let prepared = self
                .prepare_child_process(engine, &new_state, child_workflow, child_actor_data, actor_data)
                .await?;
            commit.child = Some(prepared.child.clone());
            prepared_child = Some(prepared);
        } else if new_state.status == ProcessStatus::Finished {
            if let Some(parent) = new_state.parent_process_data() {
                engine.emit(
                    EngineEventType::SubProcessUpstream,
                    &self.id,
                    json!({ "parent_process_id": parent.id }),
                );
                messages.push(EngineMessage::ContinueProcess {
                    process_id: parent.id,
                    result_data: json!({
                        "data": new_state.result,
                        "status": new_state.status,
                        "sub_process_id": self.id,
                    }),
                    expected_step_number: parent.expected_step_number + 1,
                });
            }
        }

        let timer_ids: Vec<String> = commit.timers.iter().map(|t| t.id.clone()).collect();
        self.persist(engine, commit).await?;
        self.notify_state(engine, actor_data);

        for timer_id in timer_ids {
            engine.emit(
                EngineEventType::TimerCreated,
                &self.id,
                json!({ "timer_id": timer_id }),
            );
        }
        if let Some(PreparedChild {
            mut process,
            child,
            actor_data: child_actor_data,
        }) = prepared_child
        {
            let child_id = process.id.clone();
            process.created(engine, child.state, &child_actor_data);
            engine.emit(
                EngineEventType::SubProcessCreated,
                &self.id,
                json!({ "sub_process_id": child_id, "workflow_name": process.workflow_name }),
            );
            messages.push(EngineMessage::RunProcess {
                process_id: child_id,
                actor_data: child_actor_data,
                input: json!({}),
            });
        }
        if new_state.status == ProcessStatus::Finished {
            engine.emit(EngineEventType::ProcessFinished, &self.id, json!({}));
            tracing::info!(process_id = %self.id, workflow = %self.workflow_name, "process finished");
        }
        for message in messages {
            engine.dispatch(message);
        }

        Ok(StepOutcome { activity_manager })
    }

    /// Build the child of a delegating step. It is written by the parent's
    /// commit and started by a message once that commit succeeded.
    async fn prepare_child_process(
        &self,
        engine: &Engine,
        state: &ProcessState,
        workflow_name: Option<String>,
        child_actor_data: Option<Value>,
        actor_data: &Value,
    ) -> Result<PreparedChild, EngineError> {
        let workflow_name = workflow_name.ok_or_else(|| {
            EngineError::Internal("delegated step carries no workflow_name".to_string())
        })?;
        let child_actor_data = child_actor_data.unwrap_or_else(|| actor_data.clone());

        let mut initial_bag = match &state.result {
            Some(Value::Object(map)) => Value::Object(map.clone()),
            _ => json!({}),
        };
        initial_bag["parent_process_data"] = json!({
            "id": self.id,
            "expected_step_number": state.step_number,
        });

        let creation_failed = || {
            EngineError::Internal(format!(
                "Error creating sub process from workflow '{}'",
                workflow_name
            ))
        };
        let workflow = engine
            .workflow_store
            .fetch_by_name(&workflow_name)
            .await?
            .ok_or_else(creation_failed)?;
        let process = Process::new(&workflow, &engine.config)?;
        let child = process
            .prepare_child(engine, &child_actor_data, initial_bag)
            .map_err(|_| creation_failed())?;
        Ok(PreparedChild {
            process,
            child,
            actor_data: child_actor_data,
        })
    }

    fn notify_activity_manager(&self, engine: &Engine, am: &ActivityManager) {
        engine.emit(
            EngineEventType::ActivityManagerCreated,
            &self.id,
            json!({ "activity_manager_id": am.id, "type": am.am_type.as_str() }),
        );
        let Some(notifier) = &engine.activity_manager_notifier else {
            return;
        };
        let mut payload = serde_json::to_value(am).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut payload {
            map.insert("_process_id".to_string(), json!(self.id));
        }
        notifier.notify(&payload);
    }

    /// Close open activity managers once the loop leaves on a final status.
    async fn settle_activity_managers(&self, engine: &Engine) -> Result<(), EngineError> {
        match self.status() {
            Some(ProcessStatus::Error) => {
                let n = engine
                    .activity_manager_store
                    .interrupt_for_process(&self.id)
                    .await?;
                if n > 0 {
                    tracing::debug!(process_id = %self.id, count = n, "interrupted activity managers");
                }
            }
            Some(ProcessStatus::Finished)
            | Some(ProcessStatus::Interrupted)
            | Some(ProcessStatus::Forbidden) => {
                let n = engine
                    .activity_manager_store
                    .finish_for_process(&self.id)
                    .await?;
                if n > 0 {
                    tracing::debug!(process_id = %self.id, count = n, "completed activity managers");
                }
            }
            _ => {}
        }
        Ok(())
    }
}
