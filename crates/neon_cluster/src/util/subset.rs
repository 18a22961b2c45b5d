use serde_json::Value;

/// Returns true when every field set in `intended` has the same value in `current`.
///
/// Fields the API server adds on its own (defaults, status, generated names) only appear in
/// `current` and are ignored. Unset values in `intended` (`null`, `""`, `{}`, `[]`) match
/// anything. Lists are compared element by element; `current` may carry extra trailing
/// elements, which is where the API server appends injected volumes and mounts.
pub fn is_subset(intended: &Value, current: &Value) -> bool {
    match intended {
        Value::Null => true,
        Value::String(s) if s.is_empty() => true,
        Value::Object(fields) if fields.is_empty() => true,
        Value::Array(items) if items.is_empty() => true,

        Value::Object(fields) => match current {
            Value::Object(current_fields) => fields.iter().all(|(key, value)| {
                is_subset(value, current_fields.get(key).unwrap_or(&Value::Null))
            }),
            _ => false,
        },

        Value::Array(items) => match current {
            Value::Array(current_items) => {
                items.len() <= current_items.len()
                    && items.iter().zip(current_items).all(|(a, b)| is_subset(a, b))
            }
            _ => false,
        },

        Value::Number(n) => match current {
            Value::Number(m) => numbers_equal(n, m),
            _ => false,
        },

        scalar => scalar == current,
    }
}

// 1 and 1.0 are the same quantity once they have been through the API server.
fn numbers_equal(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    if a == b {
        return true;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
