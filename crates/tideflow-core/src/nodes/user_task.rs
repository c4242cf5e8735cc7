//! UserTask — hands work to an external actor through an activity manager.
//!
//! First entry (no external input) creates the activity-manager request and
//! parks the process in `WAITING`; a `notify` activity does not wait and
//! moves straight on. Re-entry with the actor's input encrypts the declared
//! field paths and resumes at `next`.

use serde_json::{json, Value};

use super::input::{parse_timeout, prepare};
use super::{require_next, ActivityManagerRequest, NodeContext, NodeExtensions, NodeSpec, StepResult};
use crate::models::{ActivityManagerParameters, ActivityManagerType, ProcessStatus};
use crate::value::{get_path, set_path};

#[derive(Debug, Clone)]
pub struct UserTaskNode {
    pub(crate) spec: NodeSpec,
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

impl UserTaskNode {
    pub fn new(spec: NodeSpec) -> Self {
        Self { spec }
    }

    pub fn validate(spec: &NodeSpec) -> Vec<String> {
        let mut violations = Vec::new();
        require_next(spec, &mut violations);

        if !matches!(spec.parameter("action"), Some(Value::String(_))) {
            violations.push("parameters.action is required".to_string());
        }
        match spec.parameter("timeout") {
            None | Some(Value::Number(_)) | Some(Value::Object(_)) => {}
            Some(_) => violations.push("parameters.timeout must be a number or expression".into()),
        }
        for field in ["channels", "encrypted_data"] {
            if !matches!(spec.parameter(field), None | Some(Value::Array(_))) {
                violations.push(format!("parameters.{} must be a list", field));
            }
        }
        match spec.parameter("activity_manager") {
            None => {}
            Some(Value::String(kind)) if kind == "commit" || kind == "notify" => {}
            Some(_) => violations.push("parameters.activity_manager must be 'commit' or 'notify'".into()),
        }
        violations
    }

    fn am_type(&self) -> ActivityManagerType {
        self.spec
            .parameter("activity_manager")
            .and_then(Value::as_str)
            .map(ActivityManagerType::from_str)
            .unwrap_or_default()
    }

    pub fn run(&self, ctx: &NodeContext, ext: &NodeExtensions<'_>) -> Result<StepResult, String> {
        match &ctx.external_input {
            None => self.open_activity(ctx),
            Some(external_input) => self.resume(ctx, external_input.clone(), ext),
        }
    }

    fn open_activity(&self, ctx: &NodeContext) -> Result<StepResult, String> {
        let scope = ctx.expression_scope();
        let execution_data = match self.spec.parameter("input") {
            Some(template) => prepare(template, &scope),
            None => json!({}),
        };
        let action = self
            .spec
            .parameter("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let activity_schema = self.spec.parameter("activity_schema").cloned();

        let am_type = self.am_type();
        let request = ActivityManagerRequest {
            am_type,
            props: json!({ "result": execution_data, "action": action }),
            parameters: ActivityManagerParameters {
                timeout: parse_timeout(self.spec.parameter("timeout"), &scope)?,
                channels: string_list(self.spec.parameter("channels")),
                encrypted_data: string_list(self.spec.parameter("encrypted_data")),
                activity_schema: activity_schema.clone(),
                next_step_number: None,
            },
        };

        let (status, next_node_id) = match am_type {
            ActivityManagerType::Notify => (ProcessStatus::Running, self.spec.next_id()),
            ActivityManagerType::Commit => (ProcessStatus::Waiting, Some(self.spec.id.clone())),
        };

        let mut step = StepResult::new(
            &self.spec.id,
            ctx.bag.clone(),
            None,
            execution_data,
            status,
            next_node_id,
        );
        step.activity_manager = Some(request);
        step.action = Some(action);
        step.activity_schema = activity_schema;
        Ok(step)
    }

    fn resume(
        &self,
        ctx: &NodeContext,
        mut external_input: Value,
        ext: &NodeExtensions<'_>,
    ) -> Result<StepResult, String> {
        let encrypted_paths = string_list(self.spec.parameter("encrypted_data"));
        if let Some(cipher) = ext.engine.cipher.as_ref() {
            for path in &encrypted_paths {
                let Some(plain) = get_path(&external_input, path).cloned() else {
                    continue;
                };
                if plain.is_null() {
                    continue;
                }
                let sealed = cipher.encrypt(&plain)?;
                set_path(&mut external_input, path, sealed);
            }
        }

        Ok(StepResult::new(
            &self.spec.id,
            ctx.bag.clone(),
            Some(external_input.clone()),
            external_input,
            ProcessStatus::Running,
            self.spec.next_id(),
        ))
    }
}
