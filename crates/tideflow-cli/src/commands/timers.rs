//! `tideflow timers` — fire due timers once.

use serde_json::{json, Value};
use tideflow_core::{worker, Engine};

pub async fn fire(engine: &Engine) -> Result<Value, String> {
    let (fired, handled) = worker::tick(engine).await.map_err(|e| e.to_string())?;
    Ok(json!({ "fired": fired, "messages_handled": handled }))
}
