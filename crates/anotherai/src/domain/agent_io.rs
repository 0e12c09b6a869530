//! Agent inputs and outputs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::message::Message;
use crate::error::ErrorPayload;
use crate::utils::hash::hash_object;
use crate::utils::preview::{compute_preview, preview_str};

/// The input of a completion: templated messages plus the variables object.
/// The id is a content hash of the normalized pair, so identical inputs
/// dedupe across completions and experiments.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentInput {
    /// Content hash, excluded from the hashed payload.
    #[serde(default)]
    pub id: String,
    /// Human-readable truncation, excluded from the hashed payload.
    #[serde(default)]
    pub preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
}

impl AgentInput {
    /// Content hash of the normalized `(messages, variables)` pair.
    pub fn compute_id(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.remove("id");
            map.remove("preview");
        }
        hash_object(&value)
    }

    /// Fill `id` and `preview` when absent and return self.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.id.is_empty() {
            self.id = self.compute_id();
        }
        if self.preview.is_empty() {
            self.preview = self.compute_preview();
        }
        self
    }

    fn compute_preview(&self) -> String {
        if let Some(variables) = &self.variables {
            if !variables.is_null() {
                return compute_preview(variables, 255);
            }
        }
        let text = self
            .messages
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(Message::text)
            .collect::<Vec<_>>()
            .join(" ");
        preview_str(&text, 255)
    }
}

/// The output of a completion: assistant messages plus the error when the
/// run failed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentOutput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::Role;
    use serde_json::json;

    #[test]
    fn input_id_ignores_preview() {
        let a = AgentInput {
            variables: Some(json!({"city": "Toulouse"})),
            ..Default::default()
        }
        .normalized();
        let b = AgentInput {
            preview: "different".into(),
            variables: Some(json!({"city": "Toulouse"})),
            ..Default::default()
        };
        assert_eq!(a.id, b.compute_id());
    }

    #[test]
    fn preview_prefers_variables_over_messages() {
        let input = AgentInput {
            messages: Some(vec![Message::with_text(Role::User, "hello")]),
            variables: Some(json!({"city": "Toulouse"})),
            ..Default::default()
        }
        .normalized();
        assert!(input.preview.contains("Toulouse"));

        let input = AgentInput {
            messages: Some(vec![Message::with_text(Role::User, "hello world")]),
            ..Default::default()
        }
        .normalized();
        assert_eq!(input.preview, "hello world");
    }
}
