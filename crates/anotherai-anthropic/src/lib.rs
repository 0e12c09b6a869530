//! Anthropic provider adapter, speaking the Messages API.
//!
//! Unlike the OpenAI-compatible family this has its own wire shape:
//! a top-level `system` parameter, typed content blocks, `thinking`
//! blocks for extended reasoning, and a bespoke SSE event vocabulary.

use async_stream::try_stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use anotherai::domain::{
    Message, Provider, Role, Tool, ToolCallRequest, ToolChoice,
};
use anotherai::error::{Error, Result};
use anotherai::providers::http::{create_llm_client, map_transport_error};
use anotherai::providers::{
    ChunkStream, LlmUsage, ProviderAdapter, ProviderCompletion, ProviderRequest, ToolCallDelta,
};

/// Anthropic Messages endpoint.
pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "type")]
    thinking_type: &'static str,
    budget_tokens: u32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    Thinking {
        thinking: String,
    },
    RedactedThinking {},
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: Option<f64>,
    #[serde(default)]
    output_tokens: Option<f64>,
    #[serde(default)]
    cache_read_input_tokens: Option<f64>,
}

impl Usage {
    fn to_usage(&self) -> LlmUsage {
        LlmUsage {
            prompt_token_count: self.input_tokens,
            prompt_token_count_cached: self.cache_read_input_tokens,
            completion_token_count: self.output_tokens,
            ..Default::default()
        }
    }
}

/// Streaming events, per the Messages API SSE vocabulary.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: MessageStartData,
    },
    ContentBlockStart {
        index: usize,
        content_block: StreamContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: ContentDelta,
    },
    ContentBlockStop {
        #[allow(dead_code)]
        index: usize,
    },
    MessageDelta {
        #[serde(default)]
        delta: Value,
        usage: Usage,
    },
    MessageStop,
    Ping,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessageStartData {
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamContentBlock {
    Text {},
    ToolUse { id: String, name: String },
    Thinking {},
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta {},
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    message: String,
}

#[derive(Clone)]
pub struct AnthropicAdapter {
    api_key: String,
    url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAdapter")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>, url: Option<String>) -> Result<Self> {
        Ok(AnthropicAdapter {
            api_key: api_key.into(),
            url: url.unwrap_or_else(|| ANTHROPIC_API_BASE.to_string()),
            client: create_llm_client()?,
        })
    }

    /// Build from `ANTHROPIC_API_KEY` (and optional `ANTHROPIC_URL`).
    pub fn from_env() -> Option<Result<Self>> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok()?;
        Some(Self::new(api_key, std::env::var("ANTHROPIC_URL").ok()))
    }

    fn build_request(&self, request: &ProviderRequest, stream: bool) -> Result<AnthropicRequest> {
        let (system, messages) = convert_messages(&request.messages)?;
        // Anthropic has no native response_format; the schema constraint
        // travels as a system instruction and the runner validates.
        let system = match (&request.output_schema, system) {
            (Some(schema), system) => {
                let instruction = format!(
                    "Respond only with a JSON object matching this JSON schema, with no surrounding text:\n{schema}"
                );
                Some(match system {
                    Some(s) => format!("{s}\n\n{instruction}"),
                    None => instruction,
                })
            }
            (None, system) => system,
        };

        Ok(AnthropicRequest {
            model: request.model.clone(),
            max_tokens: request.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages,
            system,
            temperature: request.temperature,
            top_p: request.top_p,
            tools: request.tools.as_ref().map(|tools| {
                tools.iter().map(convert_tool).collect()
            }),
            tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
            thinking: request
                .reasoning_budget
                .filter(|b| *b > 0)
                .map(|budget_tokens| ThinkingConfig {
                    thinking_type: "enabled",
                    budget_tokens,
                }),
            stream: stream.then_some(true),
        })
    }

    async fn send(
        &self,
        request: &AnthropicRequest,
    ) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| map_transport_error(Provider::Anthropic, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        Err(map_anthropic_error(
            status.as_u16(),
            retry_after.as_deref(),
            &body,
        ))
    }
}

fn convert_tool(tool: &Tool) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        // Anthropic has no "none"; auto is the closest behavior.
        ToolChoice::Auto | ToolChoice::None => json!({"type": "auto"}),
        ToolChoice::Required => json!({"type": "any"}),
        ToolChoice::Function { name } => json!({"type": "tool", "name": name}),
    }
}

/// System messages lift into the top-level parameter; tool results become
/// `tool_result` blocks on user messages.
fn convert_messages(messages: &[Message]) -> Result<(Option<String>, Vec<AnthropicMessage>)> {
    let mut system: Option<String> = None;
    let mut out: Vec<AnthropicMessage> = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                let text = message.text();
                system = Some(match system.take() {
                    Some(existing) => format!("{existing}\n{text}"),
                    None => text,
                });
            }
            Role::User | Role::Tool => {
                let mut blocks = Vec::new();
                for part in &message.content {
                    if let Some(text) = &part.text {
                        if !text.is_empty() {
                            blocks.push(json!({"type": "text", "text": text}));
                        }
                    }
                    if let Some(file) = &part.file {
                        blocks.push(convert_file(file)?);
                    }
                    if let Some(result) = &part.tool_call_result {
                        blocks.push(json!({
                            "type": "tool_result",
                            "tool_use_id": result.id,
                            "content": result.output_preview(),
                            "is_error": result.error.is_some(),
                        }));
                    }
                }
                if !blocks.is_empty() {
                    out.push(AnthropicMessage {
                        role: "user",
                        content: blocks,
                    });
                }
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                for part in &message.content {
                    if let Some(text) = &part.text {
                        if !text.is_empty() {
                            blocks.push(json!({"type": "text", "text": text}));
                        }
                    }
                    if let Some(object) = &part.object {
                        blocks.push(json!({"type": "text", "text": object.to_string()}));
                    }
                    if let Some(call) = &part.tool_call_request {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.tool_name,
                            "input": call.tool_input_dict,
                        }));
                    }
                }
                if !blocks.is_empty() {
                    out.push(AnthropicMessage {
                        role: "assistant",
                        content: blocks,
                    });
                }
            }
        }
    }
    Ok((system, out))
}

fn convert_file(file: &anotherai::domain::File) -> Result<Value> {
    let source = match (&file.storage_url, &file.url, &file.data) {
        (Some(url), _, _) | (None, Some(url), _) => json!({"type": "url", "url": url}),
        (None, None, Some(data)) => json!({
            "type": "base64",
            "media_type": file.content_type.as_deref().unwrap_or("application/octet-stream"),
            "data": data,
        }),
        (None, None, None) => {
            return Err(Error::InvalidFile("file has neither url nor data".into()))
        }
    };
    Ok(json!({"type": "image", "source": source}))
}

fn map_anthropic_error(status: u16, retry_after: Option<&str>, body: &str) -> Error {
    let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let (error_type, message) = parsed
        .map(|e| (e.error.error_type, e.error.message))
        .unwrap_or_else(|| (String::from("unknown_error"), body.to_string()));
    let message = if message.trim().is_empty() {
        "Unknown error".to_string()
    } else {
        message.trim().to_string()
    };
    let message = match retry_after {
        Some(v) if !v.trim().is_empty() => format!("{message} (retry_after={})", v.trim()),
        _ => message,
    };

    let transient = status == 429
        || status >= 500
        || matches!(error_type.as_str(), "rate_limit_error" | "overloaded_error");
    if transient {
        Error::ProviderTransient {
            provider: Provider::Anthropic,
            message,
            provider_status: Some(status),
        }
    } else {
        Error::ProviderTerminal {
            provider: Provider::Anthropic,
            message,
            provider_status: Some(status),
        }
    }
}

fn parse_response(response: AnthropicResponse) -> ProviderCompletion {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_call_requests = Vec::new();
    for block in response.content {
        match block {
            ResponseBlock::Text { text: t } => text.push_str(&t),
            ResponseBlock::ToolUse { id, name, input } => {
                tool_call_requests.push(ToolCallRequest::new(Some(id), name, input));
            }
            ResponseBlock::Thinking { thinking } => reasoning.push_str(&thinking),
            ResponseBlock::RedactedThinking {} | ResponseBlock::Unknown => {}
        }
    }
    ProviderCompletion {
        text: (!text.is_empty()).then_some(text),
        tool_call_requests,
        reasoning: (!reasoning.is_empty()).then_some(reasoning),
        usage: response.usage.to_usage(),
        finish_reason: response.stop_reason,
    }
}

fn parse_event(event: StreamEvent) -> Option<anotherai::providers::ParsedChunk> {
    use anotherai::providers::ParsedChunk;
    match event {
        StreamEvent::MessageStart { message } => Some(ParsedChunk {
            usage: Some(message.usage.to_usage()),
            ..Default::default()
        }),
        StreamEvent::ContentBlockStart {
            index,
            content_block: StreamContentBlock::ToolUse { id, name },
        } => Some(ParsedChunk {
            tool_calls: vec![ToolCallDelta {
                index,
                id: Some(id),
                name: Some(name),
                arguments: String::new(),
            }],
            ..Default::default()
        }),
        StreamEvent::ContentBlockDelta { index, delta } => match delta {
            ContentDelta::TextDelta { text } => Some(ParsedChunk {
                delta: Some(text),
                ..Default::default()
            }),
            ContentDelta::ThinkingDelta { thinking } => Some(ParsedChunk {
                reasoning: Some(thinking),
                ..Default::default()
            }),
            ContentDelta::InputJsonDelta { partial_json } => Some(ParsedChunk {
                tool_calls: vec![ToolCallDelta {
                    index,
                    id: None,
                    name: None,
                    arguments: partial_json,
                }],
                ..Default::default()
            }),
            ContentDelta::SignatureDelta {} | ContentDelta::Unknown => None,
        },
        StreamEvent::MessageDelta { usage, delta } => {
            let finish_reason = delta
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(ParsedChunk {
                usage: Some(usage.to_usage()),
                finish_reason,
                ..Default::default()
            })
        }
        StreamEvent::ContentBlockStart { .. }
        | StreamEvent::ContentBlockStop { .. }
        | StreamEvent::MessageStop
        | StreamEvent::Ping
        | StreamEvent::Unknown => None,
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> Provider {
        Provider::Anthropic
    }

    fn default_model(&self) -> &'static str {
        "claude-3-5-haiku"
    }

    fn required_env(&self) -> &'static [&'static str] {
        &["ANTHROPIC_API_KEY"]
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderCompletion> {
        let wire = self.build_request(request, false)?;
        let response = self.send(&wire).await?;
        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error(Provider::Anthropic, &e))?;
        Ok(parse_response(parsed))
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        let wire = self.build_request(request, true)?;
        let response = self.send(&wire).await?;
        let mut events = response.bytes_stream().eventsource();
        let chunks = try_stream! {
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| Error::ProviderTransient {
                    provider: Provider::Anthropic,
                    message: format!("SSE parse error: {e}"),
                    provider_status: None,
                })?;
                let parsed: StreamEvent =
                    serde_json::from_str(&event.data).map_err(|e| Error::ProviderTerminal {
                        provider: Provider::Anthropic,
                        message: format!("unexpected stream event: {e}"),
                        provider_status: None,
                    })?;
                let done = matches!(parsed, StreamEvent::MessageStop);
                if let Some(chunk) = parse_event(parsed) {
                    yield chunk;
                }
                if done {
                    break;
                }
            }
        };
        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anotherai::domain::{MessageContent, ToolCallResult};

    #[test]
    fn system_messages_lift_to_the_top_level() {
        let messages = vec![
            Message::with_text(Role::System, "Be terse."),
            Message::with_text(Role::User, "Hello"),
        ];
        let (system, converted) = convert_messages(&messages).unwrap();
        assert_eq!(system.as_deref(), Some("Be terse."));
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].role, "user");
    }

    #[test]
    fn tool_results_become_tool_result_blocks() {
        let messages = vec![Message {
            role: Role::Tool,
            content: vec![MessageContent {
                tool_call_result: Some(ToolCallResult {
                    id: "call_1".into(),
                    tool_name: "lookup".into(),
                    result: Some(json!({"ok": true})),
                    error: None,
                }),
                ..Default::default()
            }],
        }];
        let (_, converted) = convert_messages(&messages).unwrap();
        assert_eq!(converted[0].content[0]["type"], "tool_result");
        assert_eq!(converted[0].content[0]["tool_use_id"], "call_1");
    }

    #[test]
    fn response_blocks_split_text_reasoning_and_tools() {
        let response: AnthropicResponse = serde_json::from_value(json!({
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Paris"},
                {"type": "tool_use", "id": "tu_1", "name": "lookup", "input": {"q": 1}},
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 20, "output_tokens": 6, "cache_read_input_tokens": 4},
        }))
        .unwrap();
        let parsed = parse_response(response);
        assert_eq!(parsed.text.as_deref(), Some("Paris"));
        assert_eq!(parsed.reasoning.as_deref(), Some("hmm"));
        assert_eq!(parsed.tool_call_requests[0].id, "tu_1");
        assert_eq!(parsed.usage.prompt_token_count, Some(20.0));
        assert_eq!(parsed.usage.prompt_token_count_cached, Some(4.0));
    }

    #[test]
    fn overloaded_errors_are_transient() {
        let err = map_anthropic_error(
            529,
            None,
            r#"{"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}"#,
        );
        assert!(err.retryable());

        let err = map_anthropic_error(
            400,
            None,
            r#"{"type": "error", "error": {"type": "invalid_request_error", "message": "bad"}}"#,
        );
        assert!(!err.retryable());
    }

    #[test]
    fn reasoning_budget_enables_thinking() {
        let adapter = AnthropicAdapter::new("key", None).unwrap();
        let wire = adapter
            .build_request(
                &ProviderRequest {
                    model: "claude-sonnet-4".into(),
                    messages: vec![Message::with_text(Role::User, "hi")],
                    reasoning_budget: Some(2048),
                    ..Default::default()
                },
                false,
            )
            .unwrap();
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["thinking"]["type"], "enabled");
        assert_eq!(value["thinking"]["budget_tokens"], 2048);
    }

    #[test]
    fn stream_events_map_to_chunks() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Par"}}"#,
        )
        .unwrap();
        let chunk = parse_event(event).unwrap();
        assert_eq!(chunk.delta.as_deref(), Some("Par"));

        let event: StreamEvent = serde_json::from_str(
            r#"{"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 12}}"#,
        )
        .unwrap();
        let chunk = parse_event(event).unwrap();
        assert_eq!(chunk.finish_reason.as_deref(), Some("end_turn"));
        assert_eq!(chunk.usage.unwrap().completion_token_count, Some(12.0));
    }
}
