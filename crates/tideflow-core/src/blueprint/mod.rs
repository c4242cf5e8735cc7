//! Blueprints — the immutable node graph a process executes.
//!
//! A blueprint is loaded from JSON or YAML:
//!
//! ```yaml
//! requirements: []
//! parameters:
//!   max_step_number: 50
//! environment:
//!   API_HOST: "https://example.com"
//! lanes:
//!   - id: "anyone"
//!     rule: { type: always }
//! nodes:
//!   - id: "1"
//!     type: Start
//!     name: "Start"
//!     next: "2"
//!     lane_id: "anyone"
//!   - id: "2"
//!     type: Finish
//!     name: "Done"
//!     next: null
//!     lane_id: "anyone"
//! ```

pub mod lane;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::nodes::{Node, NodeSpec};

pub use lane::{LaneRule, LaneSpec, RuleSource};

/// Serialized workflow definition, as stored with every process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BlueprintSpec {
    pub nodes: Vec<NodeSpec>,
    pub lanes: Vec<LaneSpec>,
    /// Blueprint-wide parameters, e.g. `max_step_number`.
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub environment: Value,
    /// Declared package requirements; recorded, not resolved.
    #[serde(default)]
    pub requirements: Vec<String>,
}

impl BlueprintSpec {
    pub fn from_json(content: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self, EngineError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load from a file, choosing the parser by extension.
    pub fn from_file(path: &str) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::BadRequest(format!("Failed to read '{}': {}", path, e)))?;
        if path.ends_with(".json") {
            Self::from_json(&content)
        } else {
            Self::from_yaml(&content)
        }
    }
}

/// A validated blueprint with nodes resolved into their executable variants.
#[derive(Debug, Clone)]
pub struct Blueprint {
    spec: BlueprintSpec,
    nodes: HashMap<String, Node>,
    lanes: HashMap<String, LaneSpec>,
}

impl Blueprint {
    /// Validate the spec and build the node map. All violations are collected.
    pub fn parse(spec: BlueprintSpec) -> Result<Self, EngineError> {
        let mut violations = Vec::new();

        let mut lanes = HashMap::new();
        for lane in &spec.lanes {
            if lanes.insert(lane.id.clone(), lane.clone()).is_some() {
                violations.push(format!("duplicate lane id '{}'", lane.id));
            }
        }

        let node_ids: HashSet<&str> = spec.nodes.iter().map(|n| n.id.as_str()).collect();
        let mut nodes = HashMap::new();
        for node_spec in &spec.nodes {
            if !lanes.contains_key(&node_spec.lane_id) {
                violations.push(format!(
                    "node '{}' refers to unknown lane '{}'",
                    node_spec.id, node_spec.lane_id
                ));
            }
            for target in node_spec.next_targets() {
                if !node_ids.contains(target.as_str()) {
                    violations.push(format!(
                        "node '{}' points to unknown next node '{}'",
                        node_spec.id, target
                    ));
                }
            }
            match Node::from_spec(node_spec.clone()) {
                Ok(node) => {
                    if nodes.insert(node_spec.id.clone(), node).is_some() {
                        violations.push(format!("duplicate node id '{}'", node_spec.id));
                    }
                }
                Err(node_violations) => violations.extend(
                    node_violations
                        .into_iter()
                        .map(|v| format!("node '{}': {}", node_spec.id, v)),
                ),
            }
        }

        if !spec.nodes.iter().any(|n| n.node_type == "Start") {
            violations.push("blueprint has no Start node".to_string());
        }

        if !violations.is_empty() {
            return Err(EngineError::InvalidBlueprint(violations));
        }

        Ok(Self { spec, nodes, lanes })
    }

    pub fn spec(&self) -> &BlueprintSpec {
        &self.spec
    }

    pub fn fetch_node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    pub fn lane(&self, lane_id: &str) -> Option<&LaneSpec> {
        self.lanes.get(lane_id)
    }

    /// Start nodes whose lane admits this actor with this initial bag.
    pub fn allowed_start_nodes(&self, actor_data: &Value, bag: &Value) -> Vec<&Node> {
        let mut allowed: Vec<&Node> = self
            .spec
            .nodes
            .iter()
            .filter(|spec| spec.node_type == "Start")
            .filter_map(|spec| self.nodes.get(&spec.id))
            .filter(|node| {
                self.lane(node.lane_id())
                    .map(|lane| lane.run_rule(actor_data, bag))
                    .unwrap_or(false)
            })
            .collect();
        allowed.sort_by(|a, b| a.id().cmp(b.id()));
        allowed
    }

    /// Per-blueprint step ceiling (`parameters.max_step_number`), number or numeric string.
    pub fn max_step_number(&self) -> Option<i64> {
        match self.spec.parameters.get("max_step_number")? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(value: Value) -> BlueprintSpec {
        serde_json::from_value(value).unwrap()
    }

    fn two_lane_spec() -> BlueprintSpec {
        spec(json!({
            "lanes": [
                { "id": "admins", "rule": { "type": "has_claim", "claim": "admin" } },
                { "id": "anyone", "rule": { "type": "always" } }
            ],
            "nodes": [
                { "id": "1", "type": "Start", "name": "admin start", "next": "3", "lane_id": "admins" },
                { "id": "2", "type": "Start", "name": "open start", "next": "3", "lane_id": "anyone" },
                { "id": "3", "type": "Finish", "name": "end", "next": null, "lane_id": "anyone" }
            ],
            "parameters": { "max_step_number": "25" }
        }))
    }

    #[test]
    fn test_parse_yaml_blueprint() {
        let yaml = r#"
lanes:
  - id: "anyone"
    rule: { type: always }
nodes:
  - id: "1"
    type: Start
    name: "Start"
    next: "2"
    lane_id: "anyone"
  - id: "2"
    type: Finish
    name: "Done"
    next: null
    lane_id: "anyone"
"#;
        let blueprint = Blueprint::parse(BlueprintSpec::from_yaml(yaml).unwrap()).unwrap();
        assert!(blueprint.fetch_node("1").is_some());
        assert!(blueprint.fetch_node("9").is_none());
        assert_eq!(blueprint.max_step_number(), None);
    }

    #[test]
    fn test_allowed_start_nodes_depend_on_actor() {
        let blueprint = Blueprint::parse(two_lane_spec()).unwrap();
        let admin = json!({ "claims": ["admin"] });
        let guest = json!({ "claims": [] });

        assert_eq!(blueprint.allowed_start_nodes(&admin, &json!({})).len(), 2);
        let guest_nodes = blueprint.allowed_start_nodes(&guest, &json!({}));
        assert_eq!(guest_nodes.len(), 1);
        assert_eq!(guest_nodes[0].id(), "2");
        assert_eq!(blueprint.max_step_number(), Some(25));
    }

    #[test]
    fn test_parse_collects_all_violations() {
        let bad = spec(json!({
            "lanes": [ { "id": "anyone", "rule": { "type": "always" } } ],
            "nodes": [
                { "id": "1", "type": "SystemTask", "name": "x", "next": "missing", "lane_id": "nowhere" },
                { "id": "2", "type": "Teleport", "name": "y", "next": null, "lane_id": "anyone" }
            ]
        }));
        let Err(EngineError::InvalidBlueprint(violations)) = Blueprint::parse(bad) else {
            panic!("expected an invalid blueprint");
        };
        assert!(violations.iter().any(|v| v.contains("unknown lane 'nowhere'")));
        assert!(violations.iter().any(|v| v.contains("unknown next node 'missing'")));
        assert!(violations.iter().any(|v| v.contains("Teleport")));
        assert!(violations.iter().any(|v| v.contains("no Start node")));
    }
}
