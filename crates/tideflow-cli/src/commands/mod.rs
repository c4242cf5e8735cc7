//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and drives the
//! tideflow-core manager facade through a shared `Engine`. Commands return
//! the JSON they report so tests can inspect it; `main` prints it.

pub mod activity;
pub mod process;
pub mod timers;
pub mod worker;
pub mod workflow;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tideflow_core::{Database, Engine, EngineConfig, EngineInner};

/// Open the database at `db_path` and build an engine over it, configured
/// from the environment.
pub fn init_engine(db_path: &str) -> Result<Engine, String> {
    let db = Database::open(db_path)
        .map_err(|e| format!("Failed to open database '{}': {}", db_path, e))?;
    tracing::debug!(db = %db_path, "database opened");
    Ok(Arc::new(EngineInner::new(db, EngineConfig::from_env())))
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// Parse a JSON command-line argument, naming the flag on failure.
pub fn parse_json_arg(flag: &str, raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("--{} is not valid JSON: {}", flag, e))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| format!("Failed to encode output: {}", e))
}
