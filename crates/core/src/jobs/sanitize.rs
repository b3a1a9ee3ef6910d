// crates/core/src/jobs/sanitize.rs
//! Conversion of accumulated state into a transport-safe JSON tree.

use serde_json::{Map, Number, Value};

use super::state::{is_reserved_key, AccumulatedState, StateValue};

/// Subtrees nested deeper than this are replaced by a marker string.
pub const MAX_DEPTH: usize = 128;

const TRUNCATED: &str = "<truncated: nesting too deep>";

/// Convert `value` into JSON. Never fails.
///
/// Maps recurse key by key and drop the reserved collaborator keys; lists
/// recurse element by element; anything JSON cannot represent (non-finite
/// floats, timestamps, bytes, opaque handles) becomes its string form.
pub fn sanitize(value: &StateValue) -> Value {
    sanitize_at(value, 0)
}

/// [`sanitize`] applied to a whole [`AccumulatedState`].
pub fn sanitize_state(state: &AccumulatedState) -> Value {
    sanitize(&state.to_value())
}

fn sanitize_at(value: &StateValue, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        tracing::debug!(max_depth = MAX_DEPTH, "state subtree too deep; replaced with marker");
        return Value::String(TRUNCATED.to_string());
    }
    match value {
        StateValue::Null => Value::Null,
        StateValue::Bool(b) => Value::Bool(*b),
        StateValue::Int(i) => Value::Number((*i).into()),
        StateValue::UInt(u) => Value::Number((*u).into()),
        StateValue::Float(f) => Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(f.to_string())),
        StateValue::Text(s) => Value::String(s.clone()),
        StateValue::Timestamp(ts) => Value::String(ts.to_rfc3339()),
        StateValue::Bytes(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        StateValue::List(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_at(item, depth + 1))
                .collect(),
        ),
        StateValue::Map(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !is_reserved_key(key))
                .map(|(key, v)| (key.clone(), sanitize_at(v, depth + 1)))
                .collect::<Map<String, Value>>(),
        ),
        StateValue::Opaque(handle) => Value::String(handle.describe()),
    }
}

/// Path of the first reserved key found anywhere in `value`, if any.
pub fn find_reserved_key(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.iter().find_map(|(key, child)| {
            if is_reserved_key(key) {
                Some(key.clone())
            } else {
                find_reserved_key(child).map(|path| format!("{key}.{path}"))
            }
        }),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(i, child)| find_reserved_key(child).map(|path| format!("[{i}].{path}"))),
        _ => None,
    }
}
