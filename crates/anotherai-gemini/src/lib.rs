//! Google Gemini provider adapter, speaking the `generateContent` API.
//!
//! The same adapter serves two provider tags: `google_gemini` for the
//! Generative Language endpoint and `google` for a Vertex-style endpoint;
//! only endpoint and credentials differ.

use async_stream::try_stream;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use anotherai::domain::{Message, Provider, Role, ToolCallRequest, ToolChoice};
use anotherai::error::{Error, Result};
use anotherai::providers::http::{create_llm_client, map_http_error, map_transport_error};
use anotherai::providers::{
    ChunkStream, LlmUsage, ParsedChunk, ProviderAdapter, ProviderCompletion, ProviderRequest,
    ToolCallDelta,
};

/// Generative Language API base (model and verb are appended).
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Clone)]
pub struct GeminiAdapter {
    provider: Provider,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiAdapter")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl GeminiAdapter {
    pub fn new(
        provider: Provider,
        api_key: impl Into<String>,
        base_url: Option<String>,
    ) -> Result<Self> {
        Ok(GeminiAdapter {
            provider,
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| GEMINI_API_BASE.to_string()),
            client: create_llm_client()?,
        })
    }

    /// Gemini tag from `GEMINI_API_KEY`.
    pub fn gemini_from_env() -> Option<Result<Self>> {
        let api_key = std::env::var("GEMINI_API_KEY").ok()?;
        Some(Self::new(
            Provider::GoogleGemini,
            api_key,
            std::env::var("GEMINI_URL").ok(),
        ))
    }

    /// Vertex-style tag from `GOOGLE_API_KEY` + `GOOGLE_VERTEX_URL`.
    pub fn google_from_env() -> Option<Result<Self>> {
        let api_key = std::env::var("GOOGLE_API_KEY").ok()?;
        let url = std::env::var("GOOGLE_VERTEX_URL").ok()?;
        Some(Self::new(Provider::Google, api_key, Some(url)))
    }

    fn request_url(&self, model: &str, stream: bool) -> String {
        let verb = if stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        format!("{}/{model}:{verb}", self.base_url)
    }

    async fn send(&self, url: &str, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| map_transport_error(self.provider, &e))?;
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
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or(body);
        Err(map_http_error(
            self.provider,
            status.as_u16(),
            retry_after.as_deref(),
            &message,
        ))
    }
}

fn build_body(request: &ProviderRequest) -> Result<Value> {
    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();

    for message in &request.messages {
        match message.role {
            Role::System => system_parts.push(json!({"text": message.text()})),
            Role::User | Role::Tool => {
                let parts = convert_parts(message)?;
                if !parts.is_empty() {
                    contents.push(json!({"role": "user", "parts": parts}));
                }
            }
            Role::Assistant => {
                let parts = convert_parts(message)?;
                if !parts.is_empty() {
                    contents.push(json!({"role": "model", "parts": parts}));
                }
            }
        }
    }

    let mut generation_config = Map::new();
    if let Some(t) = request.temperature {
        generation_config.insert("temperature".into(), json!(t));
    }
    if let Some(p) = request.top_p {
        generation_config.insert("topP".into(), json!(p));
    }
    if let Some(m) = request.max_output_tokens {
        generation_config.insert("maxOutputTokens".into(), json!(m));
    }
    if let Some(schema) = &request.output_schema {
        generation_config.insert("responseMimeType".into(), json!("application/json"));
        generation_config.insert("responseSchema".into(), sanitize_schema(schema));
    }
    if let Some(budget) = request.reasoning_budget {
        generation_config.insert("thinkingConfig".into(), json!({"thinkingBudget": budget}));
    }

    let mut body = Map::new();
    body.insert("contents".into(), Value::Array(contents));
    if !system_parts.is_empty() {
        body.insert(
            "systemInstruction".into(),
            json!({"parts": system_parts}),
        );
    }
    if !generation_config.is_empty() {
        body.insert("generationConfig".into(), Value::Object(generation_config));
    }
    if let Some(tools) = &request.tools {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": sanitize_schema(&t.input_schema),
                })
            })
            .collect();
        body.insert("tools".into(), json!([{"functionDeclarations": declarations}]));
        if let Some(choice) = &request.tool_choice {
            let mode = match choice {
                ToolChoice::Auto => json!({"mode": "AUTO"}),
                ToolChoice::None => json!({"mode": "NONE"}),
                ToolChoice::Required => json!({"mode": "ANY"}),
                ToolChoice::Function { name } => {
                    json!({"mode": "ANY", "allowedFunctionNames": [name]})
                }
            };
            body.insert(
                "toolConfig".into(),
                json!({"functionCallingConfig": mode}),
            );
        }
    }
    Ok(Value::Object(body))
}

/// Gemini rejects vendor keywords like `additionalProperties`; strip the
/// fields it does not understand.
fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| {
                    !matches!(k.as_str(), "additionalProperties" | "$schema" | "strict")
                })
                .map(|(k, v)| (k.clone(), sanitize_schema(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

fn convert_parts(message: &Message) -> Result<Vec<Value>> {
    let mut parts = Vec::new();
    for part in &message.content {
        if let Some(text) = &part.text {
            if !text.is_empty() {
                parts.push(json!({"text": text}));
            }
        }
        if let Some(object) = &part.object {
            parts.push(json!({"text": object.to_string()}));
        }
        if let Some(file) = &part.file {
            match (&file.data, &file.content_type) {
                (Some(data), Some(mime)) => parts.push(json!({
                    "inlineData": {"mimeType": mime, "data": data},
                })),
                _ => {
                    let url = file
                        .storage_url
                        .as_ref()
                        .or(file.url.as_ref())
                        .ok_or_else(|| {
                            Error::InvalidFile("file has neither url nor data".into())
                        })?;
                    parts.push(json!({
                        "fileData": {"fileUri": url, "mimeType": file.content_type},
                    }));
                }
            }
        }
        if let Some(call) = &part.tool_call_request {
            parts.push(json!({
                "functionCall": {"name": call.tool_name, "args": call.tool_input_dict},
            }));
        }
        if let Some(result) = &part.tool_call_result {
            parts.push(json!({
                "functionResponse": {
                    "name": result.tool_name,
                    "response": {"result": result.output_preview()},
                },
            }));
        }
    }
    Ok(parts)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: Option<bool>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<f64>,
    #[serde(default)]
    candidates_token_count: Option<f64>,
    #[serde(default)]
    thoughts_token_count: Option<f64>,
    #[serde(default)]
    cached_content_token_count: Option<f64>,
}

impl UsageMetadata {
    fn to_usage(&self) -> LlmUsage {
        LlmUsage {
            prompt_token_count: self.prompt_token_count,
            prompt_token_count_cached: self.cached_content_token_count,
            completion_token_count: self.candidates_token_count,
            reasoning_token_count: self.thoughts_token_count,
            ..Default::default()
        }
    }
}

fn parse_payload(provider: Provider, payload: &Value) -> Result<ParsedChunk> {
    let response: WireResponse =
        serde_json::from_value(payload.clone()).map_err(|e| Error::ProviderTerminal {
            provider,
            message: format!("unexpected response payload: {e}"),
            provider_status: None,
        })?;
    let mut chunk = ParsedChunk {
        usage: response.usage_metadata.map(|u| u.to_usage()),
        ..Default::default()
    };
    if let Some(candidate) = response.candidates.into_iter().next() {
        chunk.finish_reason = candidate.finish_reason;
        for (index, part) in candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
        {
            if let Some(text) = part.text {
                if part.thought == Some(true) {
                    chunk.reasoning = Some(match chunk.reasoning.take() {
                        Some(mut r) => {
                            r.push_str(&text);
                            r
                        }
                        None => text,
                    });
                } else {
                    chunk.delta = Some(match chunk.delta.take() {
                        Some(mut d) => {
                            d.push_str(&text);
                            d
                        }
                        None => text,
                    });
                }
            }
            if let Some(call) = part.function_call {
                chunk.tool_calls.push(ToolCallDelta {
                    index,
                    id: None,
                    name: Some(call.name),
                    arguments: call.args.to_string(),
                });
            }
        }
    }
    Ok(chunk)
}

fn chunk_to_completion(chunk: ParsedChunk) -> ProviderCompletion {
    ProviderCompletion {
        text: chunk.delta,
        tool_call_requests: chunk
            .tool_calls
            .into_iter()
            .filter_map(|delta| {
                let name = delta.name?;
                let args =
                    serde_json::from_str(&delta.arguments).unwrap_or(Value::Object(Map::new()));
                Some(ToolCallRequest::new(delta.id, name, args))
            })
            .collect(),
        reasoning: chunk.reasoning,
        usage: chunk.usage.unwrap_or_default(),
        finish_reason: chunk.finish_reason,
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> Provider {
        self.provider
    }

    fn default_model(&self) -> &'static str {
        "gemini-2.5-flash"
    }

    fn required_env(&self) -> &'static [&'static str] {
        match self.provider {
            Provider::Google => &["GOOGLE_API_KEY", "GOOGLE_VERTEX_URL"],
            _ => &["GEMINI_API_KEY"],
        }
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderCompletion> {
        let body = build_body(request)?;
        let url = self.request_url(&request.model, false);
        let response = self.send(&url, &body).await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| map_transport_error(self.provider, &e))?;
        Ok(chunk_to_completion(parse_payload(self.provider, &payload)?))
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        let body = build_body(request)?;
        let url = self.request_url(&request.model, true);
        let response = self.send(&url, &body).await?;
        let provider = self.provider;
        let mut events = response.bytes_stream().eventsource();
        let chunks = try_stream! {
            while let Some(event) = events.next().await {
                let event = event.map_err(|e| Error::ProviderTransient {
                    provider,
                    message: format!("SSE parse error: {e}"),
                    provider_status: None,
                })?;
                let payload: Value =
                    serde_json::from_str(&event.data).map_err(|e| Error::ProviderTerminal {
                        provider,
                        message: format!("unexpected stream payload: {e}"),
                        provider_status: None,
                    })?;
                yield parse_payload(provider, &payload)?;
            }
        };
        Ok(Box::pin(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anotherai::domain::Tool;

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "gemini-2.5-flash".into(),
            messages: vec![
                Message::with_text(Role::System, "Be terse."),
                Message::with_text(Role::User, "Capital of France?"),
            ],
            temperature: Some(0.0),
            ..Default::default()
        }
    }

    #[test]
    fn body_splits_system_and_contents() {
        let body = build_body(&request()).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be terse.");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["generationConfig"]["temperature"], 0.0);
    }

    #[test]
    fn output_schema_switches_to_json_mime() {
        let mut req = request();
        req.output_schema = Some(json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {"capital": {"type": "string"}},
        }));
        let body = build_body(&req).unwrap();
        let config = &body["generationConfig"];
        assert_eq!(config["responseMimeType"], "application/json");
        // Unsupported keywords are stripped.
        assert!(config["responseSchema"].get("additionalProperties").is_none());
        assert_eq!(config["responseSchema"]["properties"]["capital"]["type"], "string");
    }

    #[test]
    fn tools_become_function_declarations() {
        let mut req = request();
        req.tools = Some(vec![Tool {
            name: "lookup".into(),
            description: None,
            input_schema: json!({"type": "object"}),
            strict: None,
        }]);
        req.tool_choice = Some(ToolChoice::Function {
            name: "lookup".into(),
        });
        let body = build_body(&req).unwrap();
        assert_eq!(body["tools"][0]["functionDeclarations"][0]["name"], "lookup");
        assert_eq!(
            body["toolConfig"]["functionCallingConfig"]["allowedFunctionNames"][0],
            "lookup"
        );
    }

    #[test]
    fn payload_parses_text_thoughts_and_usage() {
        let payload = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "chain", "thought": true},
                    {"text": "Paris"},
                ]},
                "finishReason": "STOP",
            }],
            "usageMetadata": {
                "promptTokenCount": 8,
                "candidatesTokenCount": 2,
                "thoughtsTokenCount": 5,
            },
        });
        let chunk = parse_payload(Provider::GoogleGemini, &payload).unwrap();
        assert_eq!(chunk.delta.as_deref(), Some("Paris"));
        assert_eq!(chunk.reasoning.as_deref(), Some("chain"));
        let usage = chunk.usage.as_ref().unwrap();
        assert_eq!(usage.reasoning_token_count, Some(5.0));
        assert_eq!(chunk.finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn function_calls_parse_into_tool_deltas() {
        let payload = json!({
            "candidates": [{
                "content": {"parts": [
                    {"functionCall": {"name": "lookup", "args": {"city": "Paris"}}},
                ]},
            }],
        });
        let completion =
            chunk_to_completion(parse_payload(Provider::GoogleGemini, &payload).unwrap());
        assert_eq!(completion.tool_call_requests[0].tool_name, "lookup");
        assert_eq!(
            completion.tool_call_requests[0].tool_input_dict,
            json!({"city": "Paris"})
        );
    }
}
