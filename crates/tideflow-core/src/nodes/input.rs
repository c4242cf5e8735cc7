//! Parameter expressions.
//!
//! Node parameters may embed references into the execution scope:
//! `{"$ref": "bag.customer.email"}`. The scope exposes `bag`, `result`
//! (the previous node's result), `actor_data`, `environment` and
//! `parameters`. Unresolvable references become `null`.

use serde_json::{Map, Value};

use crate::models::{whole_seconds, Timer};
use crate::value::get_path;

const REF_KEY: &str = "$ref";

/// Resolve every `$ref` inside `template` against `scope`.
pub fn prepare(template: &Value, scope: &Value) -> Value {
    match template {
        Value::Object(map) if map.len() == 1 && map.contains_key(REF_KEY) => map[REF_KEY]
            .as_str()
            .and_then(|path| get_path(scope, path))
            .cloned()
            .unwrap_or(Value::Null),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), prepare(v, scope)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|v| prepare(v, scope)).collect()),
        other => other.clone(),
    }
}

/// Resolve a timeout declaration into whole seconds.
///
/// Accepts a number, a numeric string, or an expression resolving to either.
/// Values that cannot be scheduled as a timer are rejected.
pub fn parse_timeout(declared: Option<&Value>, scope: &Value) -> Result<Option<i64>, String> {
    let Some(declared) = declared else {
        return Ok(None);
    };
    let seconds = match prepare(declared, scope) {
        Value::Null => return Ok(None),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(whole_seconds))
            .ok_or_else(|| format!("invalid timeout {}", n))?,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("invalid timeout '{}'", s))?,
        other => return Err(format!("invalid timeout {}", other)),
    };
    Timer::timeout_from_now(seconds).map_err(|e| e.to_string())?;
    Ok(Some(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope() -> Value {
        json!({
            "bag": { "customer": { "email": "a@b.c" }, "wait": "30" },
            "result": { "score": 7 },
            "actor_data": { "id": "u1" },
            "environment": {},
            "parameters": {}
        })
    }

    #[test]
    fn test_prepare_resolves_nested_refs() {
        let template = json!({
            "to": { "$ref": "bag.customer.email" },
            "scores": [ { "$ref": "result.score" }, 1 ],
            "who": { "$ref": "actor_data.id" },
            "missing": { "$ref": "bag.nope" },
            "literal": "x"
        });
        assert_eq!(
            prepare(&template, &scope()),
            json!({
                "to": "a@b.c",
                "scores": [7, 1],
                "who": "u1",
                "missing": null,
                "literal": "x"
            })
        );
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout(None, &scope()), Ok(None));
        assert_eq!(parse_timeout(Some(&json!(60)), &scope()), Ok(Some(60)));
        assert_eq!(parse_timeout(Some(&json!(1.2)), &scope()), Ok(Some(2)));
        assert_eq!(parse_timeout(Some(&json!({ "$ref": "bag.wait" })), &scope()), Ok(Some(30)));
        assert!(parse_timeout(Some(&json!([1])), &scope()).is_err());
        let huge = json!({ "bag": { "wait": "10000000000000" } });
        assert!(parse_timeout(Some(&json!({ "$ref": "bag.wait" })), &huge).is_err());
        assert!(parse_timeout(Some(&json!(1e300)), &scope()).is_err());
    }
}
