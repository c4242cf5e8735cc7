//! Core error type for the tideflow engine.
//!
//! Status-machine outcomes (FORBIDDEN, ERROR, ...) are *not* errors: they are
//! carried as data on the process. `EngineError` is reserved for storage and
//! lock failures and for callers using the engine incorrectly.

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// A non-blocking lock could not be taken (row moved on, or database busy).
    #[error("Lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid blueprint: {}", .0.join("; "))]
    InvalidBlueprint(Vec<String>),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// True for the failures that end a step-loop attempt without being a bug:
    /// lost races and busy databases.
    pub fn is_contention(&self) -> bool {
        matches!(self, Self::LockUnavailable(_) | Self::Conflict(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                EngineError::LockUnavailable(e.to_string())
            }
            _ => EngineError::Database(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::BadRequest(format!("Invalid JSON: {}", e))
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(e: serde_yaml::Error) -> Self {
        EngineError::BadRequest(format!("Invalid YAML: {}", e))
    }
}
