//! Per-step execution traces and inference usage accounting.

use serde::{Deserialize, Serialize};

use crate::domain::provider::Provider;

/// Token/cost usage on the prompt side of an inference.
///
/// Token counts are `f64`: some providers bill fractional tokens (e.g.
/// character-based accounting at 4 characters per token).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PromptUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_token_count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_token_count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_token_count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_count: Option<u32>,
    /// Part of the prompt tokens served from the provider prompt cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_token_count: Option<f64>,
    pub cost_usd: f64,
}

/// Token/cost usage on the completion side of an inference.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompletionUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_token_count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_token_count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_token_count: Option<f64>,
    pub cost_usd: f64,
}

/// Full usage of one inference call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InferenceUsage {
    pub prompt: PromptUsage,
    pub completion: CompletionUsage,
}

/// One step inside a completion: an LLM call or a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trace {
    Llm(LlmTrace),
    Tool(ToolTrace),
}

impl Trace {
    pub fn duration_seconds(&self) -> f64 {
        match self {
            Trace::Llm(t) => t.duration_seconds,
            Trace::Tool(t) => t.duration_seconds,
        }
    }

    pub fn cost_usd(&self) -> f64 {
        match self {
            Trace::Llm(t) => t.cost_usd,
            Trace::Tool(t) => t.cost_usd,
        }
    }
}

/// Trace of one provider inference call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmTrace {
    pub model: String,
    pub provider: Provider,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<InferenceUsage>,
    pub duration_seconds: f64,
    pub cost_usd: f64,
}

/// Trace of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolTrace {
    pub name: String,
    pub tool_input_preview: String,
    pub tool_output_preview: String,
    pub duration_seconds: f64,
    pub cost_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traces_tag_by_kind() {
        let trace = Trace::Llm(LlmTrace {
            model: "gpt-4.1-mini".into(),
            provider: Provider::OpenAi,
            usage: None,
            duration_seconds: 1.5,
            cost_usd: 0.01,
        });
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(json["kind"], "llm");
        assert_eq!(json["provider"], "openai");
        let back: Trace = serde_json::from_value(json).unwrap();
        assert_eq!(back, trace);
    }
}
