//! Accumulation of streaming chunks into a final provider completion.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain::ToolCallRequest;
use crate::runner::RunnerOutputChunk;

use super::{LlmUsage, ParsedChunk, ProviderCompletion, ToolCallDelta};

#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, delta: ToolCallDelta) {
        if delta.id.is_some() {
            self.id = delta.id;
        }
        if delta.name.is_some() {
            self.name = delta.name;
        }
        self.arguments.push_str(&delta.arguments);
    }

    fn finish(self) -> Option<ToolCallRequest> {
        let name = self.name?;
        let args: Value = if self.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.arguments).unwrap_or(Value::Object(Default::default()))
        };
        Some(ToolCallRequest::new(self.id, name, args))
    }
}

/// Accumulates [`ParsedChunk`]s, emitting one [`RunnerOutputChunk`] per
/// provider chunk and producing the buffered [`ProviderCompletion`] at the
/// end of the stream.
#[derive(Debug, Default)]
pub struct StreamingContext {
    text: String,
    reasoning: String,
    tool_calls: BTreeMap<usize, ToolCallAccumulator>,
    usage: LlmUsage,
    finish_reason: Option<String>,
}

impl StreamingContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one chunk and return the delta to forward to the client.
    pub fn add_chunk(&mut self, chunk: ParsedChunk) -> RunnerOutputChunk {
        if let Some(delta) = &chunk.delta {
            self.text.push_str(delta);
        }
        if let Some(reasoning) = &chunk.reasoning {
            self.reasoning.push_str(reasoning);
        }
        for delta in chunk.tool_calls {
            self.tool_calls.entry(delta.index).or_default().absorb(delta);
        }
        if let Some(usage) = &chunk.usage {
            self.usage.merge(usage);
        }
        if chunk.finish_reason.is_some() {
            self.finish_reason = chunk.finish_reason.clone();
        }
        RunnerOutputChunk {
            delta: chunk.delta,
            reasoning: chunk.reasoning,
            tool_call_requests: None,
            final_chunk: false,
        }
    }

    /// Accumulated visible text so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Terminate the stream and produce the buffered completion.
    pub fn finalize(self) -> ProviderCompletion {
        let tool_call_requests = self
            .tool_calls
            .into_values()
            .filter_map(ToolCallAccumulator::finish)
            .collect();
        ProviderCompletion {
            text: if self.text.is_empty() {
                None
            } else {
                Some(self.text)
            },
            tool_call_requests,
            reasoning: if self.reasoning.is_empty() {
                None
            } else {
                Some(self.reasoning)
            },
            usage: self.usage,
            finish_reason: self.finish_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deltas_accumulate_in_order() {
        let mut ctx = StreamingContext::new();
        for part in ["Hel", "lo ", "world"] {
            let out = ctx.add_chunk(ParsedChunk {
                delta: Some(part.into()),
                ..Default::default()
            });
            assert_eq!(out.delta.as_deref(), Some(part));
            assert!(!out.final_chunk);
        }
        let done = ctx.finalize();
        assert_eq!(done.text.as_deref(), Some("Hello world"));
    }

    #[test]
    fn split_tool_calls_reassemble() {
        let mut ctx = StreamingContext::new();
        ctx.add_chunk(ParsedChunk {
            tool_calls: vec![ToolCallDelta {
                index: 0,
                id: Some("call_1".into()),
                name: Some("lookup".into()),
                arguments: "{\"city\":".into(),
            }],
            ..Default::default()
        });
        ctx.add_chunk(ParsedChunk {
            tool_calls: vec![ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: "\"Paris\"}".into(),
            }],
            ..Default::default()
        });
        let done = ctx.finalize();
        assert_eq!(done.tool_call_requests.len(), 1);
        let call = &done.tool_call_requests[0];
        assert_eq!(call.id, "call_1");
        assert_eq!(call.tool_input_dict, json!({"city": "Paris"}));
    }

    #[test]
    fn usage_arrives_on_the_last_chunk() {
        let mut ctx = StreamingContext::new();
        ctx.add_chunk(ParsedChunk {
            delta: Some("hi".into()),
            ..Default::default()
        });
        ctx.add_chunk(ParsedChunk {
            usage: Some(LlmUsage {
                prompt_token_count: Some(10.0),
                completion_token_count: Some(2.0),
                ..Default::default()
            }),
            finish_reason: Some("stop".into()),
            ..Default::default()
        });
        let done = ctx.finalize();
        assert_eq!(done.usage.prompt_token_count, Some(10.0));
        assert_eq!(done.finish_reason.as_deref(), Some("stop"));
    }
}
