//! Small helpers over `serde_json::Value` shared by lanes and nodes.

use serde_json::{Map, Value};

/// Look up a dotted path (`a.b.0.c`). Array segments are indexes.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Set a dotted path, creating intermediate objects as needed.
/// Returns false when a non-object sits in the way.
pub fn set_path(value: &mut Value, path: &str, new_value: Value) -> bool {
    let mut segments = path.split('.').peekable();
    let mut current = value;
    while let Some(segment) = segments.next() {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return false;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), new_value);
            return true;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    false
}

/// Shallow merge: keys of `overlay` win. Non-object sides are treated as empty.
pub fn merge_objects(base: &Value, overlay: &Value) -> Value {
    let mut merged = match base {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(map) = overlay {
        for (k, v) in map {
            merged.insert(k.clone(), v.clone());
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_path() {
        let v = json!({ "a": { "b": [ { "c": 1 } ] } });
        assert_eq!(get_path(&v, "a.b.0.c"), Some(&json!(1)));
        assert_eq!(get_path(&v, "a.x"), None);
        assert_eq!(get_path(&v, ""), Some(&v));
    }

    #[test]
    fn test_set_path_creates_objects() {
        let mut v = json!({ "card": { "number": "4111" } });
        assert!(set_path(&mut v, "card.number", json!("***")));
        assert!(set_path(&mut v, "meta.source", json!("web")));
        assert_eq!(v, json!({ "card": { "number": "***" }, "meta": { "source": "web" } }));

        let mut scalar = json!({ "a": 1 });
        assert!(!set_path(&mut scalar, "a.b", json!(2)));
    }

    #[test]
    fn test_merge_objects() {
        let merged = merge_objects(&json!({ "a": 1, "b": 1 }), &json!({ "b": 2 }));
        assert_eq!(merged, json!({ "a": 1, "b": 2 }));
        assert_eq!(merge_objects(&Value::Null, &json!({ "x": true })), json!({ "x": true }));
    }
}
