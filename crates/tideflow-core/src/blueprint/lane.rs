//! Lanes group nodes under a shared authorization rule.
//!
//! Rules are a closed set evaluated against the triggering actor and the
//! process bag:
//!
//! ```json
//! { "type": "any_of", "rules": [
//!     { "type": "has_claim", "claim": "admin" },
//!     { "type": "field_equals", "source": "bag", "path": "owner", "value": "alice" }
//! ] }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::value::get_path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaneSpec {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub rule: LaneRule,
}

/// Which document a `field_equals` rule reads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    ActorData,
    Bag,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LaneRule {
    Always,
    Never,
    /// `actor_data.claims` contains the claim.
    HasClaim { claim: String },
    FieldEquals {
        source: RuleSource,
        path: String,
        value: Value,
    },
    AllOf { rules: Vec<LaneRule> },
    AnyOf { rules: Vec<LaneRule> },
}

impl LaneRule {
    pub fn evaluate(&self, actor_data: &Value, bag: &Value) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::HasClaim { claim } => actor_data
                .get("claims")
                .and_then(Value::as_array)
                .map(|claims| claims.iter().any(|c| c.as_str() == Some(claim.as_str())))
                .unwrap_or(false),
            Self::FieldEquals {
                source,
                path,
                value,
            } => {
                let doc = match source {
                    RuleSource::ActorData => actor_data,
                    RuleSource::Bag => bag,
                };
                get_path(doc, path) == Some(value)
            }
            Self::AllOf { rules } => rules.iter().all(|r| r.evaluate(actor_data, bag)),
            Self::AnyOf { rules } => rules.iter().any(|r| r.evaluate(actor_data, bag)),
        }
    }
}

impl LaneSpec {
    pub fn run_rule(&self, actor_data: &Value, bag: &Value) -> bool {
        self.rule.evaluate(actor_data, bag)
    }
}
