//! Shared engine state.
//!
//! One `EngineInner` per engine instance, shared as [`Engine`]. It owns the
//! stores, the injected hooks and the outbox that carries cross-process
//! messages (start a child, resume a parent) so they never run inside the
//! step that produced them.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::crypto::FieldCipher;
use crate::db::Database;
use crate::events::{EngineEvent, EngineEventType, EventBus};
use crate::notifier::{ActivityManagerNotifier, ProcessStateNotifier};
use crate::store::{
    ActivityManagerStore, ProcessStateStore, ProcessStore, TimerStore, WorkflowStore,
};

/// Asynchronous message between processes.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    RunProcess {
        process_id: String,
        actor_data: Value,
        input: Value,
    },
    ContinueProcess {
        process_id: String,
        result_data: Value,
        expected_step_number: i64,
    },
}

pub struct EngineInner {
    pub db: Database,
    pub workflow_store: WorkflowStore,
    pub process_store: ProcessStore,
    pub state_store: ProcessStateStore,
    pub activity_manager_store: ActivityManagerStore,
    pub timer_store: TimerStore,
    pub event_bus: EventBus,
    pub config: EngineConfig,
    /// Stamped on every state this instance writes.
    pub engine_id: String,
    pub cipher: Option<Arc<dyn FieldCipher>>,
    pub state_notifier: Option<Arc<dyn ProcessStateNotifier>>,
    pub activity_manager_notifier: Option<Arc<dyn ActivityManagerNotifier>>,
    outbox_tx: mpsc::UnboundedSender<EngineMessage>,
    outbox_rx: Mutex<mpsc::UnboundedReceiver<EngineMessage>>,
}

pub type Engine = Arc<EngineInner>;

impl EngineInner {
    pub fn new(db: Database, config: EngineConfig) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        Self {
            workflow_store: WorkflowStore::new(db.clone()),
            process_store: ProcessStore::new(db.clone()),
            state_store: ProcessStateStore::new(db.clone()),
            activity_manager_store: ActivityManagerStore::new(db.clone()),
            timer_store: TimerStore::new(db.clone()),
            event_bus: EventBus::new(),
            config,
            engine_id: Uuid::new_v4().to_string(),
            cipher: None,
            state_notifier: None,
            activity_manager_notifier: None,
            outbox_tx,
            outbox_rx: Mutex::new(outbox_rx),
            db,
        }
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn FieldCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn with_state_notifier(mut self, notifier: Arc<dyn ProcessStateNotifier>) -> Self {
        self.state_notifier = Some(notifier);
        self
    }

    pub fn with_activity_manager_notifier(
        mut self,
        notifier: Arc<dyn ActivityManagerNotifier>,
    ) -> Self {
        self.activity_manager_notifier = Some(notifier);
        self
    }

    pub fn emit(&self, event_type: EngineEventType, process_id: &str, data: Value) {
        self.event_bus
            .emit(EngineEvent::new(event_type, process_id, data));
    }

    /// Queue a message for [`crate::worker::process_outbox`].
    pub fn dispatch(&self, message: EngineMessage) {
        if let Err(e) = self.outbox_tx.send(message) {
            tracing::warn!("Outbox closed, dropping message: {:?}", e.0);
        }
    }

    /// Take the next queued message without waiting.
    pub(crate) async fn next_message(&self) -> Option<EngineMessage> {
        self.outbox_rx.lock().await.try_recv().ok()
    }
}
