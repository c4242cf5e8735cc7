//! Observer hooks injected at engine construction.
//!
//! Both are optional. Plain closures implement the traits, so tests can pass
//! a capturing closure directly.

use serde_json::Value;

/// Called with the serialized state (plus `workflow_name`) after every
/// persisted step, and the actor that caused it.
pub trait ProcessStateNotifier: Send + Sync {
    fn notify(&self, state: &Value, actor_data: &Value);
}

impl<F> ProcessStateNotifier for F
where
    F: Fn(&Value, &Value) + Send + Sync,
{
    fn notify(&self, state: &Value, actor_data: &Value) {
        self(state, actor_data)
    }
}

/// Called once per created activity manager, with `_process_id` attached.
pub trait ActivityManagerNotifier: Send + Sync {
    fn notify(&self, activity_manager: &Value);
}

impl<F> ActivityManagerNotifier for F
where
    F: Fn(&Value) + Send + Sync,
{
    fn notify(&self, activity_manager: &Value) {
        self(activity_manager)
    }
}
