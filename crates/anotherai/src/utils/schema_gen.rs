//! Structural JSON-Schema inference from example data.

use serde_json::{json, Map, Value};

/// Derive a JSON-Schema from a JSON value.
///
/// Arrays take their item schema from the first element; `null` contributes
/// an empty schema (no assumption on the type).
pub fn schema_from_data(data: &Value) -> Value {
    match data {
        Value::Object(map) => {
            let properties: Map<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), schema_from_data(v)))
                .collect();
            json!({"type": "object", "properties": properties})
        }
        Value::Array(items) => match items.first() {
            Some(first) => json!({"type": "array", "items": schema_from_data(first)}),
            None => json!({"type": "array"}),
        },
        Value::Bool(_) => json!({"type": "boolean"}),
        Value::String(_) => json!({"type": "string"}),
        Value::Number(n) if n.is_i64() || n.is_u64() => json!({"type": "integer"}),
        Value::Number(_) => json!({"type": "number"}),
        Value::Null => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_types_are_inferred() {
        let schema = schema_from_data(&json!({
            "a_number": 1.0,
            "a_boolean": true,
            "a_array": [1, 2, 3],
            "a_object": {"a": 1, "b": "hello"},
            "a_null": null,
        }));
        assert_eq!(
            schema,
            json!({
                "type": "object",
                "properties": {
                    "a_number": {"type": "number"},
                    "a_boolean": {"type": "boolean"},
                    "a_array": {"type": "array", "items": {"type": "integer"}},
                    "a_object": {
                        "type": "object",
                        "properties": {"a": {"type": "integer"}, "b": {"type": "string"}},
                    },
                    "a_null": {},
                }
            })
        );
    }
}
