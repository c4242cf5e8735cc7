use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A filter value given either as a single item or a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn values(&self) -> Vec<String> {
        match self {
            Self::One(v) => vec![v.clone()],
            Self::Many(vs) => vs.clone(),
        }
    }
}

/// Filters accepted by process listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_name: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_status: Option<OneOrMany>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

impl ProcessFilters {
    /// Parse and validate caller-supplied filters. Returns a readable message
    /// on failure rather than an error type: bad filters are reported back as
    /// data.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let filters: ProcessFilters =
            serde_json::from_value(value).map_err(|e| format!("invalid filters: {}", e))?;

        for (field, ids) in [
            ("workflow_id", &filters.workflow_id),
            ("process_id", &filters.process_id),
        ] {
            if let Some(ids) = ids {
                for id in ids.values() {
                    if Uuid::parse_str(&id).is_err() {
                        return Err(format!("invalid filters: {} '{}' is not a uuid", field, id));
                    }
                }
            }
        }
        Ok(filters)
    }
}
