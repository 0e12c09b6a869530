//! Tool call requests and results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::hash::hash_object;
use crate::utils::preview::compute_preview;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Provider-assigned id, or the deterministic default when the provider
    /// did not supply one.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub index: usize,
    pub tool_name: String,
    pub tool_input_dict: Value,
}

impl ToolCallRequest {
    /// Build a request, deriving the id from the tool name and input hash
    /// when the provider did not supply one.
    pub fn new(id: Option<String>, tool_name: impl Into<String>, tool_input_dict: Value) -> Self {
        let tool_name = tool_name.into();
        let id = match id {
            Some(id) if !id.is_empty() => id,
            _ => Self::default_id(&tool_name, &tool_input_dict),
        };
        ToolCallRequest {
            id,
            index: 0,
            tool_name,
            tool_input_dict,
        }
    }

    /// `{tool_name}_{hash(input)}`, the id used when a provider omits one.
    pub fn default_id(tool_name: &str, input: &Value) -> String {
        format!("{tool_name}_{}", hash_object(input))
    }

    /// `name(k: v, ...)` display form, truncated per argument.
    pub fn preview(&self) -> String {
        let args = match &self.tool_input_dict {
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| format!("{k}: {}", compute_preview(v, 30)))
                .collect::<Vec<_>>()
                .join(", "),
            other => compute_preview(other, 30),
        };
        format!("{}({args})", self.tool_name)
    }
}

/// The outcome of a tool invocation, echoed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub id: String,
    pub tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallResult {
    /// Display form of the result, `Error: ...` when the call failed.
    pub fn output_preview(&self) -> String {
        match &self.error {
            Some(e) => format!("Error: {e}"),
            None => compute_preview(self.result.as_ref().unwrap_or(&Value::Null), 255),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_id_gets_deterministic_default() {
        let input = json!({"city": "Paris"});
        let a = ToolCallRequest::new(None, "lookup", input.clone());
        let b = ToolCallRequest::new(Some(String::new()), "lookup", input.clone());
        assert_eq!(a.id, b.id);
        assert!(a.id.starts_with("lookup_"));

        let explicit = ToolCallRequest::new(Some("call_1".into()), "lookup", input);
        assert_eq!(explicit.id, "call_1");
    }

    #[test]
    fn preview_renders_arguments() {
        let req = ToolCallRequest::new(None, "lookup", json!({"city": "Paris"}));
        assert_eq!(req.preview(), r#"lookup(city: "Paris")"#);
    }
}
