//! Engine lifecycle events.
//!
//! Events are purely observational: the step loop publishes them on the
//! injected [`EventBus`] and never reads them back. Nobody listening is fine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineEventType {
    ProcessCreated,
    ProcessRun,
    ProcessContinue,
    ProcessRunPending,
    ProcessExpiring,
    ProcessAborting,
    ProcessStateSet,
    ProcessTimeout,
    ProcessFinished,
    NodeError,
    NodeRunStarted,
    NodeRunFinished,
    NodeResultInvalid,
    ResultSchemaViolation,
    LockAcquired,
    TransactionBegin,
    TransactionCommit,
    TransactionRollback,
    StateCreated,
    TimerCreated,
    ActivityManagerCreated,
    SubProcessCreated,
    SubProcessUpstream,
    ExecutionLoopLeft,
}

impl EngineEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessCreated => "PROCESS.CREATED",
            Self::ProcessRun => "PROCESS.RUN",
            Self::ProcessContinue => "PROCESS.CONTINUE",
            Self::ProcessRunPending => "PROCESS.RUN_PENDING",
            Self::ProcessExpiring => "PROCESS.EXPIRING",
            Self::ProcessAborting => "PROCESS.ABORTING",
            Self::ProcessStateSet => "PROCESS.STATE.SET",
            Self::ProcessTimeout => "PROCESS.TIMEOUT",
            Self::ProcessFinished => "PROCESS.FINISHED",
            Self::NodeError => "NODE.ERROR",
            Self::NodeRunStarted => "NODE.RUN_STARTED",
            Self::NodeRunFinished => "NODE.RUN_FINISHED",
            Self::NodeResultInvalid => "NODE.RESULT_INVALID",
            Self::ResultSchemaViolation => "PROCESS.RESULT_SCHEMA.ERROR",
            Self::LockAcquired => "EXECUTION_LOOP.LOCK",
            Self::TransactionBegin => "EXECUTION_LOOP.TRANSACTION",
            Self::TransactionCommit => "EXECUTION_LOOP.COMMIT",
            Self::TransactionRollback => "EXECUTION_LOOP.ROLLBACK",
            Self::StateCreated => "PROCESS_STATE.NEW",
            Self::TimerCreated => "PROCESS.TIMER.NEW",
            Self::ActivityManagerCreated => "PROCESS.ACTIVITY_MANAGER.CREATED",
            Self::SubProcessCreated => "PROCESS.SUBPROCESS.NEW",
            Self::SubProcessUpstream => "PROCESS.SUBPROCESS.UPSTREAM",
            Self::ExecutionLoopLeft => "EXECUTION_LOOP.LEFT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub event_type: EngineEventType,
    pub process_id: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(event_type: EngineEventType, process_id: &str, data: Value) -> Self {
        Self {
            event_type,
            process_id: process_id.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Broadcast channel for engine events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: EngineEvent) {
        tracing::debug!(
            event = event.event_type.as_str(),
            process_id = %event.process_id,
            data = %event.data,
            "engine event"
        );
        // Err only means there are no subscribers.
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
