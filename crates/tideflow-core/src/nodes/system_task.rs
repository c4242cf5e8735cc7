//! Automatic nodes: Start, Finish, SystemTask and Flow.

use serde_json::{json, Value};

use super::input::{parse_timeout, prepare};
use super::{require_next, NodeContext, NodeSpec, StepResult};
use crate::models::ProcessStatus;
use crate::value::merge_objects;

/// Prepared `parameters.input`, or an empty object when none is declared.
fn prepared_input(spec: &NodeSpec, ctx: &NodeContext) -> Value {
    match spec.parameter("input") {
        Some(template) => prepare(template, &ctx.expression_scope()),
        None => json!({}),
    }
}

fn validate_timeout(spec: &NodeSpec, violations: &mut Vec<String>) {
    match spec.parameter("timeout") {
        None | Some(Value::Number(_)) | Some(Value::Object(_)) | Some(Value::String(_)) => {}
        Some(_) => violations.push("parameters.timeout must be a number or expression".into()),
    }
}

// ─── Start ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StartNode {
    pub(crate) spec: NodeSpec,
}

impl StartNode {
    pub fn new(spec: NodeSpec) -> Self {
        Self { spec }
    }

    pub fn validate(spec: &NodeSpec) -> Vec<String> {
        let mut violations = Vec::new();
        require_next(spec, &mut violations);
        validate_timeout(spec, &mut violations);
        violations
    }

    /// A declared timeout becomes the process-level timeout (`result.timeout`).
    pub fn run(&self, ctx: &NodeContext) -> Result<StepResult, String> {
        let mut result = prepared_input(&self.spec, ctx);
        if let Some(seconds) =
            parse_timeout(self.spec.parameter("timeout"), &ctx.expression_scope())?
        {
            result = merge_objects(&result, &json!({ "timeout": seconds }));
        }
        Ok(StepResult::new(
            &self.spec.id,
            ctx.bag.clone(),
            ctx.external_input.clone(),
            result,
            ProcessStatus::Running,
            self.spec.next_id(),
        ))
    }
}

// ─── Finish ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FinishNode {
    pub(crate) spec: NodeSpec,
}

impl FinishNode {
    pub fn new(spec: NodeSpec) -> Self {
        Self { spec }
    }

    pub fn validate(spec: &NodeSpec) -> Vec<String> {
        match &spec.next {
            None | Some(Value::Null) => Vec::new(),
            Some(_) => vec!["next must be null on a Finish node".to_string()],
        }
    }

    pub fn run(&self, ctx: &NodeContext) -> Result<StepResult, String> {
        Ok(StepResult::new(
            &self.spec.id,
            ctx.bag.clone(),
            ctx.external_input.clone(),
            prepared_input(&self.spec, ctx),
            ProcessStatus::Finished,
            None,
        ))
    }
}

// ─── SystemTask ─────────────────────────────────────────────────────────

const SET_TO_BAG: &str = "set_to_bag";
const TIMER: &str = "timer";

#[derive(Debug, Clone)]
pub struct SystemTaskNode {
    pub(crate) spec: NodeSpec,
}

impl SystemTaskNode {
    pub fn new(spec: NodeSpec) -> Self {
        Self { spec }
    }

    pub fn validate(spec: &NodeSpec) -> Vec<String> {
        let mut violations = Vec::new();
        require_next(spec, &mut violations);
        validate_timeout(spec, &mut violations);
        match spec.category.as_deref() {
            None | Some(SET_TO_BAG) => {}
            Some(TIMER) => {
                if spec.parameter("timeout").is_none() {
                    violations.push("timer tasks require parameters.timeout".to_string());
                }
            }
            Some(other) => violations.push(format!("unknown system task category '{}'", other)),
        }
        violations
    }

    pub fn run(&self, ctx: &NodeContext) -> Result<StepResult, String> {
        let input = prepared_input(&self.spec, ctx);
        let next = self.spec.next_id();
        let external_input = ctx.external_input.clone();

        match self.spec.category.as_deref() {
            Some(SET_TO_BAG) => {
                if !input.is_object() {
                    return Err("set_to_bag input must be an object".to_string());
                }
                let bag = merge_objects(&ctx.bag, &input);
                Ok(StepResult::new(
                    &self.spec.id,
                    bag,
                    external_input,
                    input,
                    ProcessStatus::Running,
                    next,
                ))
            }
            Some(TIMER) => {
                let seconds = parse_timeout(self.spec.parameter("timeout"), &ctx.expression_scope())?
                    .ok_or_else(|| "timer resolved to no timeout".to_string())?;
                let result = merge_objects(&input, &json!({ "timeout": seconds }));
                Ok(StepResult::new(
                    &self.spec.id,
                    ctx.bag.clone(),
                    external_input,
                    result,
                    ProcessStatus::Pending,
                    next,
                ))
            }
            _ => Ok(StepResult::new(
                &self.spec.id,
                ctx.bag.clone(),
                external_input,
                input,
                ProcessStatus::Running,
                next,
            )),
        }
    }
}

// ─── Flow ───────────────────────────────────────────────────────────────

const DEFAULT_BRANCH: &str = "default";

#[derive(Debug, Clone)]
pub struct FlowNode {
    pub(crate) spec: NodeSpec,
}

impl FlowNode {
    pub fn new(spec: NodeSpec) -> Self {
        Self { spec }
    }

    pub fn validate(spec: &NodeSpec) -> Vec<String> {
        let mut violations = Vec::new();
        match &spec.next {
            Some(Value::Object(branches)) if !branches.is_empty() => {
                if branches.values().any(|v| !(v.is_string() || v.is_number())) {
                    violations.push("every flow branch must name a node id".to_string());
                }
            }
            _ => violations.push("next must map decision values to node ids".to_string()),
        }
        if spec
            .parameters
            .get("input")
            .and_then(|input| input.get("decision"))
            .is_none()
        {
            violations.push("parameters.input.decision is required".to_string());
        }
        violations
    }

    /// Branch for a decision value, falling back to `default`.
    fn branch_for(&self, decision: Option<&Value>) -> Option<String> {
        let Some(Value::Object(branches)) = &self.spec.next else {
            return None;
        };
        let key = decision.map(decision_key);
        key.and_then(|k| branches.get(&k))
            .or_else(|| branches.get(DEFAULT_BRANCH))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    }

    pub fn next(&self, result: Option<&Value>) -> Option<String> {
        self.branch_for(result.and_then(|r| r.get("decision")))
    }

    pub fn run(&self, ctx: &NodeContext) -> Result<StepResult, String> {
        let input = prepared_input(&self.spec, ctx);
        let decision = input.get("decision").cloned().unwrap_or(Value::Null);
        let next = self
            .branch_for(Some(&decision))
            .ok_or_else(|| format!("no branch for decision '{}'", decision_key(&decision)))?;
        Ok(StepResult::new(
            &self.spec.id,
            ctx.bag.clone(),
            ctx.external_input.clone(),
            input,
            ProcessStatus::Running,
            Some(next),
        ))
    }
}

fn decision_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(value: Value) -> NodeSpec {
        serde_json::from_value(value).unwrap()
    }

    fn ctx(bag: Value) -> NodeContext {
        NodeContext {
            bag,
            input: json!({ "approved": true }),
            actor_data: json!({ "id": "u1" }),
            process_id: "p1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_start_carries_timeout() {
        let node = StartNode::new(spec(json!({
            "id": "1", "type": "Start", "next": "2", "lane_id": "l",
            "parameters": { "timeout": 120 }
        })));
        let step = node.run(&ctx(json!({}))).unwrap();
        assert_eq!(step.status, ProcessStatus::Running);
        assert_eq!(step.result["timeout"], 120);
        assert_eq!(step.next_node_id.as_deref(), Some("2"));
    }

    #[test]
    fn test_set_to_bag_merges() {
        let node = SystemTaskNode::new(spec(json!({
            "id": "2", "type": "SystemTask", "category": "set_to_bag", "next": "3", "lane_id": "l",
            "parameters": { "input": { "who": { "$ref": "actor_data.id" } } }
        })));
        let step = node.run(&ctx(json!({ "keep": 1 }))).unwrap();
        assert_eq!(step.bag, json!({ "keep": 1, "who": "u1" }));
    }

    #[test]
    fn test_timer_task_is_pending() {
        let node = SystemTaskNode::new(spec(json!({
            "id": "2", "type": "SystemTask", "category": "timer", "next": "3", "lane_id": "l",
            "parameters": { "timeout": 60 }
        })));
        let step = node.run(&ctx(json!({}))).unwrap();
        assert_eq!(step.status, ProcessStatus::Pending);
        assert_eq!(step.result["timeout"], 60);
    }

    #[test]
    fn test_unknown_category_fails_validation() {
        let violations = SystemTaskNode::validate(&spec(json!({
            "id": "2", "type": "SystemTask", "category": "http", "next": "3", "lane_id": "l"
        })));
        assert_eq!(violations, vec!["unknown system task category 'http'".to_string()]);
    }

    #[test]
    fn test_flow_branches() {
        let node = FlowNode::new(spec(json!({
            "id": "3", "type": "Flow", "lane_id": "l",
            "next": { "true": "4", "default": "5" },
            "parameters": { "input": { "decision": { "$ref": "result.approved" } } }
        })));
        let step = node.run(&ctx(json!({}))).unwrap();
        assert_eq!(step.next_node_id.as_deref(), Some("4"));
        assert_eq!(node.next(Some(&json!({ "decision": "maybe" }))), Some("5".into()));
    }

    #[test]
    fn test_flow_without_matching_branch_errors() {
        let node = FlowNode::new(spec(json!({
            "id": "3", "type": "Flow", "lane_id": "l",
            "next": { "yes": "4" },
            "parameters": { "input": { "decision": "no" } }
        })));
        let err = node.run(&ctx(json!({}))).unwrap_err();
        assert_eq!(err, "no branch for decision 'no'");
    }
}
