//! Nodes that spawn child processes.
//!
//! `SubProcess` hands control to the child and waits (`DELEGATED`); the step
//! loop creates the child and the child's completion resumes the parent.
//! `StartProcess` creates and starts the child itself and keeps running.

use serde_json::{json, Value};

use super::input::prepare;
use super::{require_next, NodeContext, NodeExtensions, NodeSpec, StepResult};
use crate::engine::EngineMessage;
use crate::manager;
use crate::models::ProcessStatus;
use crate::value::merge_objects;

fn validate_child_parameters(spec: &NodeSpec, violations: &mut Vec<String>) {
    match spec.parameter("workflow_name") {
        Some(Value::String(_)) | Some(Value::Object(_)) => {}
        Some(_) => violations.push("parameters.workflow_name must be a string or expression".into()),
        None => violations.push("parameters.workflow_name is required".into()),
    }
    match spec.parameter("actor_data") {
        Some(Value::Object(_)) => {}
        Some(_) => violations.push("parameters.actor_data must be an object".into()),
        None => violations.push("parameters.actor_data is required".into()),
    }
}

/// Resolved `(workflow_name, actor_data, input)` for the child.
fn prepare_child(spec: &NodeSpec, ctx: &NodeContext) -> Result<(String, Value, Value), String> {
    let scope = ctx.expression_scope();
    let workflow_name = spec
        .parameter("workflow_name")
        .map(|template| prepare(template, &scope))
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| "workflow_name did not resolve to a name".to_string())?;
    let actor_data = spec
        .parameter("actor_data")
        .map(|template| prepare(template, &scope))
        .unwrap_or_else(|| json!({}));
    let input = match spec.parameter("input") {
        Some(template) => prepare(template, &scope),
        None => json!({}),
    };
    Ok((workflow_name, actor_data, input))
}

#[derive(Debug, Clone)]
pub struct SubProcessNode {
    pub(crate) spec: NodeSpec,
}

impl SubProcessNode {
    pub fn new(spec: NodeSpec) -> Self {
        Self { spec }
    }

    pub fn validate(spec: &NodeSpec) -> Vec<String> {
        let mut violations = Vec::new();
        require_next(spec, &mut violations);
        validate_child_parameters(spec, &mut violations);
        violations
    }

    /// Delegates on first entry; a re-run with the child's output resumes.
    pub fn run(&self, ctx: &NodeContext) -> Result<StepResult, String> {
        if let Some(external_input) = &ctx.external_input {
            return Ok(StepResult::new(
                &self.spec.id,
                ctx.bag.clone(),
                Some(external_input.clone()),
                external_input.clone(),
                ProcessStatus::Running,
                self.spec.next_id(),
            ));
        }

        let (workflow_name, actor_data, input) = prepare_child(&self.spec, ctx)?;
        if !input.is_object() {
            return Err("sub process input must be an object".to_string());
        }
        let mut step = StepResult::new(
            &self.spec.id,
            ctx.bag.clone(),
            None,
            input,
            ProcessStatus::Delegated,
            self.spec.next_id(),
        );
        step.workflow_name = Some(workflow_name);
        step.actor_data = Some(actor_data);
        Ok(step)
    }
}

#[derive(Debug, Clone)]
pub struct StartProcessNode {
    pub(crate) spec: NodeSpec,
}

impl StartProcessNode {
    pub fn new(spec: NodeSpec) -> Self {
        Self { spec }
    }

    pub fn validate(spec: &NodeSpec) -> Vec<String> {
        let mut violations = Vec::new();
        require_next(spec, &mut violations);
        validate_child_parameters(spec, &mut violations);
        violations
    }

    pub async fn run(
        &self,
        ctx: &NodeContext,
        ext: &NodeExtensions<'_>,
    ) -> Result<StepResult, String> {
        let (workflow_name, actor_data, input) = prepare_child(&self.spec, ctx)?;
        let actor_data = merge_objects(
            &actor_data,
            &json!({ "parentProcessData": { "id": ctx.process_id } }),
        );

        let created = manager::create_process_by_workflow_name(
            ext.engine,
            &workflow_name,
            actor_data.clone(),
            input,
        )
        .await
        .map_err(|e| e.to_string())?;

        let (result, status) = match created {
            Some(child) if child.status == ProcessStatus::Unstarted => {
                tracing::info!(
                    parent_id = %ctx.process_id,
                    child_id = %child.process_id,
                    workflow = %workflow_name,
                    "started child process"
                );
                ext.engine.dispatch(EngineMessage::RunProcess {
                    process_id: child.process_id.clone(),
                    actor_data,
                    input: json!({}),
                });
                (json!({ "process_id": child.process_id }), ProcessStatus::Running)
            }
            _ => (
                json!({ "process_id": "", "error": "unable to create process" }),
                ProcessStatus::Error,
            ),
        };

        Ok(StepResult::new(
            &self.spec.id,
            ctx.bag.clone(),
            ctx.external_input.clone(),
            result,
            status,
            self.spec.next_id(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(value: Value) -> NodeSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_sub_process_delegates() {
        let node = SubProcessNode::new(spec(json!({
            "id": "3", "type": "SubProcess", "next": "4", "lane_id": "l",
            "parameters": {
                "workflow_name": { "$ref": "bag.child" },
                "actor_data": { "id": { "$ref": "actor_data.id" } },
                "input": { "amount": { "$ref": "bag.amount" } }
            }
        })));
        let ctx = NodeContext {
            bag: json!({ "child": "billing", "amount": 10 }),
            actor_data: json!({ "id": "u1" }),
            process_id: "p1".into(),
            ..Default::default()
        };
        let step = node.run(&ctx).unwrap();
        assert_eq!(step.status, ProcessStatus::Delegated);
        assert_eq!(step.workflow_name.as_deref(), Some("billing"));
        assert_eq!(step.actor_data, Some(json!({ "id": "u1" })));
        assert_eq!(step.result, json!({ "amount": 10 }));
    }

    #[test]
    fn test_sub_process_requires_a_name() {
        let node = SubProcessNode::new(spec(json!({
            "id": "3", "type": "SubProcess", "next": "4", "lane_id": "l",
            "parameters": { "workflow_name": { "$ref": "bag.missing" }, "actor_data": {} }
        })));
        let err = node.run(&NodeContext::default()).unwrap_err();
        assert!(err.contains("workflow_name"));
    }

    #[test]
    fn test_validation_requires_child_parameters() {
        let violations = StartProcessNode::validate(&spec(json!({
            "id": "3", "type": "StartProcess", "next": "4", "lane_id": "l",
            "parameters": { "actor_data": "nobody" }
        })));
        assert_eq!(
            violations,
            vec![
                "parameters.workflow_name is required".to_string(),
                "parameters.actor_data must be an object".to_string(),
            ]
        );
    }
}
