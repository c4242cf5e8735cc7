//! Field-level encryption hook for user-task submissions.

use serde_json::Value;

/// Encrypts one submitted value. Injected into the engine; when none is
/// configured, declared `encrypted_data` paths are stored as submitted.
pub trait FieldCipher: Send + Sync {
    fn encrypt(&self, value: &Value) -> Result<Value, String>;
}
