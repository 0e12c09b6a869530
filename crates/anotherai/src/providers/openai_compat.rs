//! Shared wire codec for OpenAI-compatible chat-completions APIs.
//!
//! OpenAI, Azure OpenAI, Groq, Fireworks, xAI and Mistral all speak this
//! dialect; the per-provider crates configure the endpoint, auth style and
//! quirks and delegate the wire work here.

use async_stream::try_stream;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::{Message, MessageContent, Provider, Role, ToolCallRequest, ToolChoice};
use crate::error::{Error, Result};

use super::http::{map_http_error, map_transport_error};
use super::{ChunkStream, LlmUsage, ParsedChunk, ProviderCompletion, ProviderRequest, ToolCallDelta};

/// How the API key travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// A bare header, e.g. Azure's `api-key`.
    Header(&'static str),
}

/// Endpoint configuration for one OpenAI-compatible provider.
#[derive(Clone)]
pub struct OpenAiCompatConfig {
    pub provider: Provider,
    /// Full chat-completions url.
    pub url: String,
    pub api_key: String,
    pub auth: AuthStyle,
}

// Keys never reach logs.
impl std::fmt::Debug for OpenAiCompatConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatConfig")
            .field("provider", &self.provider)
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<Value>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

/// Build the wire request body.
pub fn build_request(request: &ProviderRequest, stream: bool) -> Result<Value> {
    let mut messages = Vec::new();
    for message in &request.messages {
        convert_message(message, &mut messages)?;
    }

    let wire = WireRequest {
        model: request.model.clone(),
        messages,
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_output_tokens,
        presence_penalty: request.presence_penalty,
        frequency_penalty: request.frequency_penalty,
        parallel_tool_calls: request.parallel_tool_calls,
        tools: request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                            "strict": t.strict,
                        },
                    })
                })
                .collect()
        }),
        tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
        response_format: request.output_schema.as_ref().map(|schema| {
            json!({
                "type": "json_schema",
                "json_schema": {"name": "output", "schema": schema, "strict": true},
            })
        }),
        reasoning_effort: request.reasoning_effort.and_then(|e| match e {
            crate::domain::ReasoningEffort::Disabled => None,
            crate::domain::ReasoningEffort::Low => Some("low"),
            crate::domain::ReasoningEffort::Medium => Some("medium"),
            crate::domain::ReasoningEffort::High => Some("high"),
        }),
        stream: stream.then_some(true),
        // Without this the final stream chunk carries no usage.
        stream_options: stream.then(|| json!({"include_usage": true})),
    };
    Ok(serde_json::to_value(wire)?)
}

fn convert_message(message: &Message, out: &mut Vec<WireMessage>) -> Result<()> {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    // Tool results become their own `tool` role messages.
    for part in &message.content {
        if let Some(result) = &part.tool_call_result {
            out.push(WireMessage {
                role: "tool",
                content: Some(Value::String(result.output_preview())),
                tool_calls: None,
                tool_call_id: Some(result.id.clone()),
            });
        }
    }

    let parts = convert_content_parts(&message.content)?;
    let tool_calls: Vec<Value> = message
        .content
        .iter()
        .filter_map(|p| p.tool_call_request.as_ref())
        .map(|call| {
            json!({
                "id": call.id,
                "type": "function",
                "function": {
                    "name": call.tool_name,
                    "arguments": call.tool_input_dict.to_string(),
                },
            })
        })
        .collect();

    if parts.is_none() && tool_calls.is_empty() {
        return Ok(());
    }
    out.push(WireMessage {
        role,
        content: parts,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    });
    Ok(())
}

/// Plain text collapses to a string; files force the parts representation.
fn convert_content_parts(content: &[MessageContent]) -> Result<Option<Value>> {
    let mut parts = Vec::new();
    let mut has_file = false;
    for part in content {
        if let Some(text) = &part.text {
            parts.push(json!({"type": "text", "text": text}));
        }
        if let Some(object) = &part.object {
            parts.push(json!({"type": "text", "text": object.to_string()}));
        }
        if let Some(file) = &part.file {
            has_file = true;
            let url = match (&file.storage_url, &file.url, &file.data) {
                (Some(storage), _, _) => storage.clone(),
                (None, Some(url), _) => url.clone(),
                (None, None, Some(data)) => {
                    let media = file.content_type.as_deref().unwrap_or("application/octet-stream");
                    format!("data:{media};base64,{data}")
                }
                (None, None, None) => {
                    return Err(Error::InvalidFile("file has neither url nor data".into()))
                }
            };
            parts.push(json!({"type": "image_url", "image_url": {"url": url}}));
        }
    }
    if parts.is_empty() {
        return Ok(None);
    }
    if !has_file && parts.len() == 1 {
        return Ok(Some(parts[0]["text"].clone()));
    }
    Ok(Some(Value::Array(parts)))
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Function { name } => {
            json!({"type": "function", "function": {"name": name}})
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
    /// Reasoning text, returned by providers that expose chains of thought
    /// (Fireworks, Groq, xAI).
    #[serde(default, alias = "reasoning")]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunctionCall,
}

#[derive(Debug, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: Option<f64>,
    #[serde(default)]
    completion_tokens: Option<f64>,
    #[serde(default)]
    prompt_tokens_details: Option<WirePromptDetails>,
    #[serde(default)]
    completion_tokens_details: Option<WireCompletionDetails>,
}

#[derive(Debug, Deserialize)]
struct WirePromptDetails {
    #[serde(default)]
    cached_tokens: Option<f64>,
    #[serde(default)]
    audio_tokens: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireCompletionDetails {
    #[serde(default)]
    reasoning_tokens: Option<f64>,
}

impl WireUsage {
    fn to_usage(&self) -> LlmUsage {
        LlmUsage {
            prompt_token_count: self.prompt_tokens,
            prompt_token_count_cached: self
                .prompt_tokens_details
                .as_ref()
                .and_then(|d| d.cached_tokens),
            prompt_audio_token_count: self
                .prompt_tokens_details
                .as_ref()
                .and_then(|d| d.audio_tokens),
            completion_token_count: self.completion_tokens,
            reasoning_token_count: self
                .completion_tokens_details
                .as_ref()
                .and_then(|d| d.reasoning_tokens),
            ..Default::default()
        }
    }
}

/// Parse a buffered response body.
pub fn parse_response(provider: Provider, body: &Value) -> Result<ProviderCompletion> {
    let response: WireResponse = serde_json::from_value(body.clone()).map_err(|e| {
        Error::ProviderTerminal {
            provider,
            message: format!("unexpected response payload: {e}"),
            provider_status: None,
        }
    })?;
    let choice = response.choices.into_iter().next().ok_or_else(|| {
        Error::ProviderTerminal {
            provider,
            message: "response contained no choices".into(),
            provider_status: None,
        }
    })?;

    let tool_call_requests = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| {
            let args: Value = if call.function.arguments.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments.clone()))
            };
            ToolCallRequest::new(call.id, call.function.name, args)
        })
        .collect();

    Ok(ProviderCompletion {
        text: choice.message.content,
        tool_call_requests,
        reasoning: choice.message.reasoning_content,
        usage: response.usage.map(|u| u.to_usage()).unwrap_or_default(),
        finish_reason: choice.finish_reason,
    })
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChunkChoice {
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "reasoning")]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireChunkToolCall {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct WireChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Parse one SSE data payload into a normalized chunk.
pub fn parse_chunk(provider: Provider, data: &str) -> Result<ParsedChunk> {
    let chunk: WireChunk = serde_json::from_str(data).map_err(|e| Error::ProviderTerminal {
        provider,
        message: format!("unexpected stream payload: {e}"),
        provider_status: None,
    })?;
    let mut parsed = ParsedChunk {
        usage: chunk.usage.map(|u| u.to_usage()),
        ..Default::default()
    };
    if let Some(choice) = chunk.choices.into_iter().next() {
        parsed.delta = choice.delta.content;
        parsed.reasoning = choice.delta.reasoning_content;
        parsed.finish_reason = choice.finish_reason;
        parsed.tool_calls = choice
            .delta
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCallDelta {
                index: call.index,
                id: call.id,
                name: call.function.as_ref().and_then(|f| f.name.clone()),
                arguments: call
                    .function
                    .and_then(|f| f.arguments)
                    .unwrap_or_default(),
            })
            .collect();
    }
    Ok(parsed)
}

#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    error: WireErrorBody,
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    #[serde(default)]
    message: Option<String>,
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<WireErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error.message)
        .unwrap_or_else(|| body.to_string())
}

fn request_builder(
    client: &reqwest::Client,
    config: &OpenAiCompatConfig,
    body: &Value,
) -> reqwest::RequestBuilder {
    let builder = client.post(&config.url).json(body);
    match config.auth {
        AuthStyle::Bearer => builder.bearer_auth(&config.api_key),
        AuthStyle::Header(name) => builder.header(name, &config.api_key),
    }
}

async fn check_response(
    provider: Provider,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
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
    Err(map_http_error(
        provider,
        status.as_u16(),
        retry_after.as_deref(),
        &error_message(&body),
    ))
}

/// Issue a buffered request.
pub async fn complete(
    client: &reqwest::Client,
    config: &OpenAiCompatConfig,
    request: &ProviderRequest,
) -> Result<ProviderCompletion> {
    let body = build_request(request, false)?;
    let mut builder = request_builder(client, config, &body);
    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }
    let response = builder
        .send()
        .await
        .map_err(|e| map_transport_error(config.provider, &e))?;
    let response = check_response(config.provider, response).await?;
    let payload: Value = response
        .json()
        .await
        .map_err(|e| map_transport_error(config.provider, &e))?;
    parse_response(config.provider, &payload)
}

/// Issue a streaming request; the returned stream ends at `[DONE]`.
pub async fn stream(
    client: &reqwest::Client,
    config: &OpenAiCompatConfig,
    request: &ProviderRequest,
) -> Result<ChunkStream> {
    let body = build_request(request, true)?;
    let response = request_builder(client, config, &body)
        .send()
        .await
        .map_err(|e| map_transport_error(config.provider, &e))?;
    let response = check_response(config.provider, response).await?;

    let provider = config.provider;
    let mut events = response.bytes_stream().eventsource();
    let chunks = try_stream! {
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| Error::ProviderTransient {
                provider,
                message: format!("SSE parse error: {e}"),
                provider_status: None,
            })?;
            if event.data.trim() == "[DONE]" {
                break;
            }
            yield parse_chunk(provider, &event.data)?;
        }
    };
    Ok(Box::pin(chunks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Message, Role, Tool};

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "gpt-4.1-mini".into(),
            messages: vec![
                Message::with_text(Role::System, "Be terse."),
                Message::with_text(Role::User, "What is the meaning of life?"),
            ],
            temperature: Some(0.0),
            ..Default::default()
        }
    }

    #[test]
    fn request_body_has_messages_and_params() {
        let body = build_request(&request(), false).unwrap();
        assert_eq!(body["model"], "gpt-4.1-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "What is the meaning of life?");
        assert_eq!(body["temperature"], 0.0);
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn streaming_requests_ask_for_usage() {
        let body = build_request(&request(), true).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn output_schema_becomes_response_format() {
        let mut req = request();
        req.output_schema = Some(json!({
            "type": "object",
            "properties": {"capital": {"type": "string"}, "country": {"type": "string"}},
        }));
        let body = build_request(&req, false).unwrap();
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(
            body["response_format"]["json_schema"]["schema"]["properties"]["capital"]["type"],
            "string"
        );
    }

    #[test]
    fn tools_serialize_as_functions() {
        let mut req = request();
        req.tools = Some(vec![Tool {
            name: "lookup".into(),
            description: Some("Find a city".into()),
            input_schema: json!({"type": "object"}),
            strict: None,
        }]);
        req.tool_choice = Some(ToolChoice::Required);
        let body = build_request(&req, false).unwrap();
        assert_eq!(body["tools"][0]["function"]["name"], "lookup");
        assert_eq!(body["tool_choice"], "required");
    }

    #[test]
    fn response_parses_content_and_usage() {
        let body = json!({
            "choices": [{
                "message": {"role": "assistant", "content": "42."},
                "finish_reason": "stop",
            }],
            "usage": {
                "prompt_tokens": 12,
                "completion_tokens": 3,
                "prompt_tokens_details": {"cached_tokens": 4},
                "completion_tokens_details": {"reasoning_tokens": 0},
            },
        });
        let parsed = parse_response(Provider::OpenAi, &body).unwrap();
        assert_eq!(parsed.text.as_deref(), Some("42."));
        assert_eq!(parsed.usage.prompt_token_count, Some(12.0));
        assert_eq!(parsed.usage.prompt_token_count_cached, Some(4.0));
        assert_eq!(parsed.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn response_parses_tool_calls_with_default_ids() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "function": {"name": "lookup", "arguments": "{\"city\": \"Paris\"}"},
                    }],
                },
                "finish_reason": "tool_calls",
            }],
        });
        let parsed = parse_response(Provider::OpenAi, &body).unwrap();
        assert_eq!(parsed.tool_call_requests.len(), 1);
        let call = &parsed.tool_call_requests[0];
        assert_eq!(call.tool_name, "lookup");
        assert!(call.id.starts_with("lookup_"), "expected derived id, got {}", call.id);
    }

    #[test]
    fn chunk_parses_delta_and_reasoning() {
        let parsed = parse_chunk(
            Provider::Fireworks,
            r#"{"choices": [{"delta": {"content": "Par", "reasoning_content": "think"}, "finish_reason": null}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.delta.as_deref(), Some("Par"));
        assert_eq!(parsed.reasoning.as_deref(), Some("think"));
    }

    #[test]
    fn empty_choice_list_is_terminal() {
        let err = parse_response(Provider::OpenAi, &json!({"choices": []})).unwrap_err();
        assert!(!err.retryable());
    }
}
