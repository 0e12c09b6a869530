//! Runner output shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Message, MessageContent, Role, ToolCallRequest};

/// One chunk of a streamed completion. `final_chunk` is emitted exactly
/// once, last.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunnerOutputChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_requests: Option<Vec<ToolCallRequest>>,
    #[serde(rename = "final", default)]
    pub final_chunk: bool,
}

impl RunnerOutputChunk {
    /// Whether the chunk carries anything worth forwarding.
    pub fn is_empty(&self) -> bool {
        self.delta.is_none()
            && self.reasoning.is_none()
            && self.tool_call_requests.is_none()
            && !self.final_chunk
    }
}

/// The buffered output of a completed run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunnerOutput {
    /// Text output, or the parsed object when an output schema was set.
    pub output: Value,
    pub tool_call_requests: Vec<ToolCallRequest>,
    pub reasoning: Option<String>,
}

impl RunnerOutput {
    /// Convert to the assistant messages stored on the completion.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut content: Vec<MessageContent> = Vec::new();
        match &self.output {
            Value::Null => {}
            Value::String(s) if s.is_empty() => {}
            Value::String(s) => content.push(MessageContent::text(s.clone())),
            other => content.push(MessageContent::object(other.clone())),
        }
        for call in &self.tool_call_requests {
            content.push(MessageContent::tool_call_request(call.clone()));
        }
        if let Some(reasoning) = &self.reasoning {
            content.push(MessageContent::reasoning(reasoning.clone()));
        }
        if content.is_empty() {
            return vec![];
        }
        vec![Message {
            role: Role::Assistant,
            content,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn final_flag_serializes_as_final() {
        let chunk = RunnerOutputChunk {
            final_chunk: true,
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&chunk).unwrap(), json!({"final": true}));
    }

    #[test]
    fn output_messages_carry_text_tools_and_reasoning() {
        let output = RunnerOutput {
            output: json!("hello"),
            tool_call_requests: vec![ToolCallRequest::new(
                Some("call_1".into()),
                "lookup",
                json!({}),
            )],
            reasoning: Some("because".into()),
        };
        let messages = output.to_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].content.len(), 3);
        assert_eq!(messages[0].content[0].text.as_deref(), Some("hello"));
    }

    #[test]
    fn structured_output_is_an_object_part() {
        let output = RunnerOutput {
            output: json!({"capital": "Paris"}),
            ..Default::default()
        };
        let messages = output.to_messages();
        assert_eq!(
            messages[0].content[0].object,
            Some(json!({"capital": "Paris"}))
        );
    }

    #[test]
    fn empty_output_yields_no_messages() {
        assert!(RunnerOutput::default().to_messages().is_empty());
    }
}
