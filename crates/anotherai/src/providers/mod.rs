//! Provider adapter abstractions.
//!
//! Each provider crate implements [`ProviderAdapter`]; adapters are
//! stateless aside from injected configuration, and everything the runner
//! needs from a provider flows through [`ProviderRequest`] /
//! [`ProviderCompletion`] / [`ParsedChunk`].

pub mod http;
pub mod openai_compat;
pub mod streaming;
mod usage;

pub use streaming::StreamingContext;
pub use usage::{LlmCompletion, LlmUsage};

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::domain::{Message, Provider, ReasoningEffort, Tool, ToolCallRequest, ToolChoice};
use crate::error::Result;

/// A provider-agnostic inference request. Messages are fully rendered and
/// reasoning options are already clamped to the model's supported window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Option<Vec<Tool>>,
    pub tool_choice: Option<ToolChoice>,
    /// JSON-Schema the output must match; adapters use native structured
    /// output where the provider supports it.
    pub output_schema: Option<Value>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_output_tokens: Option<u32>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    pub parallel_tool_calls: Option<bool>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub reasoning_budget: Option<u32>,
    pub timeout: Option<Duration>,
}

/// A parsed, buffered provider response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProviderCompletion {
    pub text: Option<String>,
    pub tool_call_requests: Vec<ToolCallRequest>,
    pub reasoning: Option<String>,
    pub usage: LlmUsage,
    pub finish_reason: Option<String>,
}

/// A fragment of an in-flight tool call on a stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    /// Fragment of the JSON arguments string.
    pub arguments: String,
}

/// One parsed streaming chunk, normalized across providers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedChunk {
    pub delta: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    /// Usage, typically on the last chunk only.
    pub usage: Option<LlmUsage>,
    pub finish_reason: Option<String>,
}

/// Stream of parsed chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ParsedChunk>> + Send>>;

/// The capability set every provider satisfies.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider tag, used for dispatch, traces and metrics labels.
    fn name(&self) -> Provider;

    /// Model used when a request reaches the provider without one.
    fn default_model(&self) -> &'static str;

    /// Environment variables the adapter needs to be configured.
    fn required_env(&self) -> &'static [&'static str];

    /// Issue a buffered request.
    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderCompletion>;

    /// Issue a streaming request.
    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream>;
}

/// Constructs adapters by provider tag. Implemented by the factories crate;
/// the runner depends only on this capability.
pub trait AdapterFactory: Send + Sync {
    /// The adapter for a provider, when its environment is configured.
    fn adapter(&self, provider: Provider) -> Option<std::sync::Arc<dyn ProviderAdapter>>;

    /// Providers with satisfied configuration, in priority order.
    fn available_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .iter()
            .copied()
            .filter(|p| self.adapter(*p).is_some())
            .collect()
    }
}
