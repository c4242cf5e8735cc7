//! Nodes — the executable units of a blueprint.
//!
//! The variant set is closed: every node type the engine understands is a
//! variant of [`Node`], dispatched by its `type` tag. Each variant validates
//! its own declaration and runs to produce a [`StepResult`].
//!
//! A node never fails past its own boundary. Any failure inside `run` is
//! turned into a `StepResult` with status `ERROR` and the error message, and
//! the elapsed time is measured either way.
//!
//! # Variants
//!
//! | type           | behaviour                                              |
//! |----------------|--------------------------------------------------------|
//! | `Start`        | entry point, optional process-level timeout            |
//! | `Finish`       | terminates the process                                 |
//! | `SystemTask`   | automatic work (`set_to_bag`, `timer`, pass-through)   |
//! | `Flow`         | branches on a decision value                           |
//! | `UserTask`     | waits for an external actor via an activity manager    |
//! | `SubProcess`   | delegates to a child process and waits for it          |
//! | `StartProcess` | fires off a child process and keeps going              |

pub mod input;
pub mod sub_process;
pub mod system_task;
pub mod user_task;

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::Engine;
use crate::models::{ActivityManagerParameters, ActivityManagerType, ProcessStatus};

pub use sub_process::{StartProcessNode, SubProcessNode};
pub use system_task::{FinishNode, FlowNode, StartNode, SystemTaskNode};
pub use user_task::UserTaskNode;

/// Results nested deeper than this are rejected as non-representable.
pub const MAX_RESULT_DEPTH: usize = 128;

/// Declarative node definition as written in a blueprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub name: String,
    /// A node id, or for `Flow` nodes a map of decision value → node id.
    #[serde(default)]
    pub next: Option<Value>,
    #[serde(default)]
    pub parameters: Value,
    pub lane_id: String,
    /// JSON schema that `result.data` must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_schema: Option<Value>,
}

impl NodeSpec {
    /// Every node id this node may hand over to.
    pub fn next_targets(&self) -> Vec<String> {
        match &self.next {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Number(n)) => vec![n.to_string()],
            Some(Value::Object(map)) => map
                .values()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// `next` as a single node id.
    pub fn next_id(&self) -> Option<String> {
        match &self.next {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn parameter(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }
}

/// Everything a node sees when it runs.
#[derive(Debug, Clone, Default)]
pub struct NodeContext {
    pub bag: Value,
    /// Result of the previous step.
    pub input: Value,
    /// Data supplied by an outside actor for this step.
    pub external_input: Option<Value>,
    pub actor_data: Value,
    pub environment: Value,
    /// Blueprint-wide parameters.
    pub parameters: Value,
    pub process_id: String,
}

impl NodeContext {
    /// Scope that `$ref` expressions resolve against.
    pub fn expression_scope(&self) -> Value {
        json!({
            "bag": self.bag,
            "result": self.input,
            "actor_data": self.actor_data,
            "environment": self.environment,
            "parameters": self.parameters,
        })
    }
}

/// Engine services available to nodes that reach outside the process.
pub struct NodeExtensions<'a> {
    pub engine: &'a Engine,
}

/// Request to create an activity manager bound to the resulting state.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityManagerRequest {
    pub am_type: ActivityManagerType,
    pub props: Value,
    pub parameters: ActivityManagerParameters,
}

/// What a node produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub node_id: String,
    pub bag: Value,
    pub external_input: Option<Value>,
    pub result: Value,
    pub error: Option<String>,
    pub status: ProcessStatus,
    pub next_node_id: Option<String>,
    /// Milliseconds spent inside the node.
    pub time_elapsed: i64,
    pub activity_manager: Option<ActivityManagerRequest>,
    pub action: Option<String>,
    pub activity_schema: Option<Value>,
    /// Child workflow for `DELEGATED` results.
    pub workflow_name: Option<String>,
    /// Actor the child process runs as, for `DELEGATED` results.
    pub actor_data: Option<Value>,
}

impl StepResult {
    pub fn new(
        node_id: &str,
        bag: Value,
        external_input: Option<Value>,
        result: Value,
        status: ProcessStatus,
        next_node_id: Option<String>,
    ) -> Self {
        Self {
            node_id: node_id.to_string(),
            bag,
            external_input,
            result,
            error: None,
            status,
            next_node_id,
            time_elapsed: 0,
            activity_manager: None,
            action: None,
            activity_schema: None,
            workflow_name: None,
            actor_data: None,
        }
    }

    /// The shape every node failure is converted into.
    pub fn failure(node_id: &str, ctx: &NodeContext, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(
                node_id,
                ctx.bag.clone(),
                ctx.external_input.clone(),
                json!({}),
                ProcessStatus::Error,
                None,
            )
        }
    }
}

/// A blueprint node, dispatched by type tag.
#[derive(Debug, Clone)]
pub enum Node {
    Start(StartNode),
    Finish(FinishNode),
    SystemTask(SystemTaskNode),
    Flow(FlowNode),
    UserTask(UserTaskNode),
    SubProcess(SubProcessNode),
    StartProcess(StartProcessNode),
}

impl Node {
    /// Validate a declaration and build the matching variant.
    pub fn from_spec(spec: NodeSpec) -> Result<Self, Vec<String>> {
        let violations = Self::validate(&spec);
        if !violations.is_empty() {
            return Err(violations);
        }
        Ok(match spec.node_type.as_str() {
            "Start" => Self::Start(StartNode::new(spec)),
            "Finish" => Self::Finish(FinishNode::new(spec)),
            "SystemTask" => Self::SystemTask(SystemTaskNode::new(spec)),
            "Flow" => Self::Flow(FlowNode::new(spec)),
            "UserTask" => Self::UserTask(UserTaskNode::new(spec)),
            "SubProcess" => Self::SubProcess(SubProcessNode::new(spec)),
            "StartProcess" => Self::StartProcess(StartProcessNode::new(spec)),
            other => return Err(vec![format!("unknown node type '{}'", other)]),
        })
    }

    /// Rule violations in a declaration; empty when valid.
    pub fn validate(spec: &NodeSpec) -> Vec<String> {
        let mut violations = Vec::new();
        if spec.id.trim().is_empty() {
            violations.push("id must not be empty".to_string());
        }
        if !(spec.parameters.is_null() || spec.parameters.is_object()) {
            violations.push("parameters must be an object".to_string());
        }
        match spec.node_type.as_str() {
            "Start" => violations.extend(StartNode::validate(spec)),
            "Finish" => violations.extend(FinishNode::validate(spec)),
            "SystemTask" => violations.extend(SystemTaskNode::validate(spec)),
            "Flow" => violations.extend(FlowNode::validate(spec)),
            "UserTask" => violations.extend(UserTaskNode::validate(spec)),
            "SubProcess" => violations.extend(SubProcessNode::validate(spec)),
            "StartProcess" => violations.extend(StartProcessNode::validate(spec)),
            other => violations.push(format!("unknown node type '{}'", other)),
        }
        violations
    }

    pub fn spec(&self) -> &NodeSpec {
        match self {
            Self::Start(n) => &n.spec,
            Self::Finish(n) => &n.spec,
            Self::SystemTask(n) => &n.spec,
            Self::Flow(n) => &n.spec,
            Self::UserTask(n) => &n.spec,
            Self::SubProcess(n) => &n.spec,
            Self::StartProcess(n) => &n.spec,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec().id
    }

    pub fn lane_id(&self) -> &str {
        &self.spec().lane_id
    }

    /// The node this one hands over to, given its result.
    pub fn next(&self, result: Option<&Value>) -> Option<String> {
        match self {
            Self::Flow(n) => n.next(result),
            Self::Finish(_) => None,
            other => other.spec().next_id(),
        }
    }

    /// Execute the node. Never fails: faults come back as an `ERROR` result.
    pub async fn run(&self, ctx: &NodeContext, ext: &NodeExtensions<'_>) -> StepResult {
        let started = Instant::now();
        let outcome = match self {
            Self::Start(n) => n.run(ctx),
            Self::Finish(n) => n.run(ctx),
            Self::SystemTask(n) => n.run(ctx),
            Self::Flow(n) => n.run(ctx),
            Self::UserTask(n) => n.run(ctx, ext),
            Self::SubProcess(n) => n.run(ctx),
            Self::StartProcess(n) => n.run(ctx, ext).await,
        };
        let mut step = outcome.unwrap_or_else(|error| {
            tracing::debug!(node_id = %self.id(), %error, "node run failed");
            StepResult::failure(self.id(), ctx, error)
        });
        step.time_elapsed = elapsed_ms(started);
        step
    }
}

/// Whole milliseconds since `started`, rounded up.
fn elapsed_ms(started: Instant) -> i64 {
    let micros = started.elapsed().as_micros() as i64;
    (micros + 999) / 1000
}

/// A result is plain structured data: `null`, an object, or an array,
/// nested no deeper than [`MAX_RESULT_DEPTH`].
pub fn is_representable(result: &Value) -> bool {
    fn depth_ok(value: &Value, depth: usize) -> bool {
        if depth > MAX_RESULT_DEPTH {
            return false;
        }
        match value {
            Value::Object(map) => map.values().all(|v| depth_ok(v, depth + 1)),
            Value::Array(items) => items.iter().all(|v| depth_ok(v, depth + 1)),
            _ => true,
        }
    }
    match result {
        Value::Null => true,
        Value::Object(_) | Value::Array(_) => depth_ok(result, 0),
        _ => false,
    }
}

/// Validate `instance` against a JSON schema, joining every violation.
pub fn validate_schema(schema: &Value, instance: &Value) -> Result<(), String> {
    let validator =
        jsonschema::validator_for(schema).map_err(|e| format!("invalid schema: {}", e))?;
    let messages: Vec<String> = validator
        .iter_errors(instance)
        .map(|e| e.to_string())
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(messages.join("; "))
    }
}

pub(crate) fn require_next(spec: &NodeSpec, violations: &mut Vec<String>) {
    if spec.next_id().is_none() {
        violations.push("next must be a node id".to_string());
    }
}
