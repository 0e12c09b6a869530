//! OpenAI-compatible wire models and their conversions to the domain.
//!
//! The request is the OpenAI chat-completions body plus the extension
//! fields (`agent_id`, `provider`, `use_cache`, `use_fallback`, `input`,
//! `metadata`); unknown fields collect into an opaque residue instead of
//! failing the parse.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use anotherai::domain::{
    AgentCompletion, AgentInput, AgentOutput, CacheUsage, CompletionSource, FallbackOption,
    File, Message, MessageContent, Provider, ReasoningEffort, Role, Tool, ToolCallRequest,
    ToolChoice, Trace, Version,
};
use anotherai::error::{Error, Result};
use anotherai::runner::{CompletionRequest, RunnerOutputChunk};

use crate::config::APP_URL;

/// Display url of a completion in the companion app.
pub fn completion_url(id: Uuid) -> String {
    format!("{APP_URL}/completions/{id}")
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default, alias = "max_completion_tokens")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub presence_penalty: Option<f64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    #[serde(default)]
    pub parallel_tool_calls: Option<bool>,
    #[serde(default)]
    pub tools: Option<Vec<OpenAiTool>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub response_format: Option<Value>,
    #[serde(default)]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub stream: Option<bool>,

    // Extension fields.
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub use_cache: Option<CacheUsage>,
    #[serde(default)]
    pub use_fallback: Option<FallbackOption>,
    #[serde(default)]
    pub input: Option<RequestInput>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, Value>>,

    /// Anything else the SDK sent; kept opaque.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestInput {
    #[serde(default)]
    pub variables: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<OpenAiContent>,
    #[serde(default)]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiTool {
    #[serde(default)]
    pub function: Option<OpenAiFunction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunction {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub strict: Option<bool>,
}

fn convert_role(role: &str) -> Result<Role> {
    match role {
        "system" | "developer" => Ok(Role::System),
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        "tool" => Ok(Role::Tool),
        other => Err(Error::BadRequest(format!("unknown message role: {other}"))),
    }
}

fn convert_message(message: &OpenAiMessage) -> Result<Message> {
    let role = convert_role(&message.role)?;
    let mut content = Vec::new();
    match &message.content {
        Some(OpenAiContent::Text(text)) => {
            if role == Role::Tool {
                content.push(MessageContent {
                    tool_call_result: Some(anotherai::domain::ToolCallResult {
                        id: message.tool_call_id.clone().unwrap_or_default(),
                        tool_name: String::new(),
                        result: Some(Value::String(text.clone())),
                        error: None,
                    }),
                    ..Default::default()
                });
            } else {
                content.push(MessageContent::text(text.clone()));
            }
        }
        Some(OpenAiContent::Parts(parts)) => {
            for part in parts {
                match part {
                    OpenAiContentPart::Text { text } => {
                        content.push(MessageContent::text(text.clone()));
                    }
                    OpenAiContentPart::ImageUrl { image_url } => {
                        let file = File {
                            url: Some(image_url.url.clone()),
                            ..Default::default()
                        };
                        content.push(MessageContent {
                            // Template references inside file urls resolve
                            // after substitution; validation happens then.
                            file: Some(file),
                            ..Default::default()
                        });
                    }
                }
            }
        }
        None => {}
    }
    for call in message.tool_calls.as_deref().unwrap_or_default() {
        let name = call["function"]["name"].as_str().unwrap_or_default();
        let arguments: Value = call["function"]["arguments"]
            .as_str()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(Value::Object(Map::new()));
        content.push(MessageContent::tool_call_request(ToolCallRequest::new(
            call["id"].as_str().map(str::to_string),
            name,
            arguments,
        )));
    }
    Ok(Message { role, content })
}

fn convert_tool_choice(value: &Value) -> Result<Option<ToolChoice>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => match s.as_str() {
            "auto" => Ok(Some(ToolChoice::Auto)),
            "none" => Ok(Some(ToolChoice::None)),
            "required" => Ok(Some(ToolChoice::Required)),
            other => Err(Error::BadRequest(format!("unknown tool_choice: {other}"))),
        },
        Value::Object(map) => {
            let name = map
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .ok_or_else(|| Error::BadRequest("tool_choice is missing function.name".into()))?;
            Ok(Some(ToolChoice::Function {
                name: name.to_string(),
            }))
        }
        _ => Err(Error::BadRequest("invalid tool_choice".into())),
    }
}

/// Extract the JSON-Schema from an OpenAI `response_format`.
fn output_schema(response_format: Option<&Value>) -> Option<Value> {
    let format = response_format?;
    match format["type"].as_str() {
        Some("json_schema") => format["json_schema"]["schema"].as_object().map(|schema| {
            Value::Object(schema.clone())
        }),
        _ => None,
    }
}

impl OpenAiChatRequest {
    /// Agent the completion is recorded under.
    pub fn agent_id(&self) -> &str {
        self.agent_id.as_deref().unwrap_or("default")
    }

    /// Convert to the sanitized runner request.
    pub fn to_runner_request(&self, source: CompletionSource) -> Result<CompletionRequest> {
        let provider = self
            .provider
            .as_deref()
            .map(|p| {
                Provider::parse(p)
                    .ok_or_else(|| Error::InvalidRunOptions(format!("Provider {p} is not valid")))
            })
            .transpose()?;
        let messages: Vec<Message> = self
            .messages
            .iter()
            .map(convert_message)
            .collect::<Result<_>>()?;
        let tools = self.tools.as_ref().map(|tools| {
            tools
                .iter()
                .filter_map(|t| t.function.as_ref())
                .map(|f| Tool {
                    name: f.name.clone(),
                    description: f.description.clone(),
                    input_schema: f.parameters.clone().unwrap_or(Value::Object(Map::new())),
                    strict: f.strict,
                })
                .collect::<Vec<_>>()
        });

        Ok(CompletionRequest {
            model: self.model.clone(),
            provider,
            messages,
            variables: self.input.as_ref().and_then(|i| i.variables.clone()),
            tools,
            tool_choice: self
                .tool_choice
                .as_ref()
                .map(convert_tool_choice)
                .transpose()?
                .flatten(),
            output_schema: output_schema(self.response_format.as_ref()),
            temperature: self.temperature,
            top_p: self.top_p,
            max_output_tokens: self.max_tokens,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
            parallel_tool_calls: self.parallel_tool_calls,
            reasoning_effort: self.reasoning_effort,
            reasoning_budget: None,
            use_cache: self.use_cache.unwrap_or_default(),
            use_fallback: self.use_fallback.clone().unwrap_or_default(),
            stream: self.stream.unwrap_or(false),
            source,
            metadata: self.metadata.clone().unwrap_or_default(),
            preserve_credits: None,
            timeout: None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAiChatResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<OpenAiChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<OpenAiUsage>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAiChoice {
    pub index: u32,
    pub message: OpenAiResponseMessage,
    pub finish_reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAiResponseMessage {
    pub role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAiUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

fn usage_from_traces(traces: &[Trace]) -> Option<OpenAiUsage> {
    let mut prompt = 0.0;
    let mut completion = 0.0;
    let mut seen = false;
    for trace in traces {
        if let Trace::Llm(t) = trace {
            if let Some(usage) = &t.usage {
                seen = true;
                prompt += usage.prompt.text_token_count.unwrap_or(0.0);
                completion += usage.completion.text_token_count.unwrap_or(0.0)
                    + usage.completion.reasoning_token_count.unwrap_or(0.0);
            }
        }
    }
    seen.then(|| OpenAiUsage {
        prompt_tokens: prompt as u64,
        completion_tokens: completion as u64,
        total_tokens: (prompt + completion) as u64,
    })
}

fn wire_tool_calls(messages: &[Message]) -> Option<Vec<Value>> {
    let calls: Vec<Value> = messages
        .iter()
        .flat_map(|m| m.content.iter())
        .filter_map(|c| c.tool_call_request.as_ref())
        .map(|call| {
            serde_json::json!({
                "id": call.id,
                "type": "function",
                "function": {
                    "name": call.tool_name,
                    "arguments": call.tool_input_dict.to_string(),
                },
            })
        })
        .collect();
    (!calls.is_empty()).then_some(calls)
}

impl OpenAiChatResponse {
    pub fn from_completion(completion: &AgentCompletion) -> Self {
        let content = completion
            .agent_output
            .messages
            .iter()
            .flat_map(|m| m.content.iter())
            .find_map(|c| {
                c.text
                    .clone()
                    .or_else(|| c.object.as_ref().map(Value::to_string))
            });
        let tool_calls = wire_tool_calls(&completion.agent_output.messages);
        let finish_reason = if tool_calls.is_some() { "tool_calls" } else { "stop" };
        OpenAiChatResponse {
            id: completion.id.to_string(),
            object: "chat.completion",
            created: completion.created_at().timestamp(),
            model: completion
                .final_model()
                .unwrap_or(&completion.version.model)
                .to_string(),
            choices: vec![OpenAiChoice {
                index: 0,
                message: OpenAiResponseMessage {
                    role: "assistant",
                    content,
                    tool_calls,
                },
                finish_reason,
                cost_usd: completion.cost_usd,
                duration_seconds: completion.duration_seconds,
            }],
            usage: usage_from_traces(&completion.traces),
            url: completion_url(completion.id),
        }
    }
}

/// One SSE frame of a streamed completion.
#[derive(Debug, Clone, Serialize)]
pub struct OpenAiChatChunk {
    pub id: String,
    pub object: &'static str,
    pub choices: Vec<OpenAiChunkChoice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAiChunkChoice {
    pub index: u32,
    pub delta: OpenAiDelta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OpenAiDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
}

impl OpenAiChatChunk {
    pub fn from_runner_chunk(id: &str, chunk: &RunnerOutputChunk) -> Self {
        let tool_calls = chunk.tool_call_requests.as_ref().map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(index, call)| {
                    serde_json::json!({
                        "index": index,
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.tool_name,
                            "arguments": call.tool_input_dict.to_string(),
                        },
                    })
                })
                .collect::<Vec<_>>()
        });
        OpenAiChatChunk {
            id: id.to_string(),
            object: "chat.completion.chunk",
            choices: vec![OpenAiChunkChoice {
                index: 0,
                delta: OpenAiDelta {
                    content: chunk.delta.clone(),
                    reasoning_content: chunk.reasoning.clone(),
                    tool_calls,
                },
                finish_reason: chunk.final_chunk.then_some("stop"),
            }],
        }
    }
}

/// Body of `POST /v1/completions`: import of an already-computed record.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportCompletionRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub agent_id: String,
    pub version: Version,
    pub input: AgentInput,
    pub output: AgentOutput,
    #[serde(default)]
    pub messages: Option<Vec<Message>>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub metadata: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportCompletionResponse {
    pub id: Uuid,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_openai_request_parses_with_extensions() {
        let request: OpenAiChatRequest = serde_json::from_value(json!({
            "model": "gpt-4.1-mini",
            "messages": [{"role": "user", "content": "What is the meaning of life?"}],
            "provider": "openai",
            "use_cache": "never",
            "some_vendor_specific_field": {"a": 1},
        }))
        .unwrap();
        assert_eq!(request.agent_id(), "default");
        assert_eq!(request.use_cache, Some(CacheUsage::Never));
        assert!(request.extra.contains_key("some_vendor_specific_field"));

        let runner_request = request.to_runner_request(CompletionSource::Api).unwrap();
        assert_eq!(runner_request.provider, Some(Provider::OpenAi));
        assert_eq!(runner_request.messages[0].text(), "What is the meaning of life?");
    }

    #[test]
    fn unknown_provider_is_invalid_run_options() {
        let request: OpenAiChatRequest = serde_json::from_value(json!({
            "model": "gpt-4.1-mini",
            "messages": [{"role": "user", "content": "hi"}],
            "provider": "not-a-provider",
        }))
        .unwrap();
        let err = request.to_runner_request(CompletionSource::Api).unwrap_err();
        assert_eq!(err.code(), "invalid_run_options");
    }

    #[test]
    fn response_format_schema_is_extracted() {
        let request: OpenAiChatRequest = serde_json::from_value(json!({
            "model": "gpt-4.1-mini",
            "messages": [{"role": "user", "content": "Toulouse"}],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "output",
                    "schema": {"type": "object", "properties": {"capital": {"type": "string"}}},
                },
            },
        }))
        .unwrap();
        let runner_request = request.to_runner_request(CompletionSource::Api).unwrap();
        assert_eq!(
            runner_request.output_schema.unwrap()["properties"]["capital"]["type"],
            "string"
        );
    }

    #[test]
    fn image_parts_become_files() {
        let request: OpenAiChatRequest = serde_json::from_value(json!({
            "model": "gpt-4.1-mini",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "describe"},
                {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}},
            ]}],
        }))
        .unwrap();
        let runner_request = request.to_runner_request(CompletionSource::Api).unwrap();
        let files: Vec<_> = runner_request.messages[0].files().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].url.as_deref(), Some("https://example.com/cat.png"));
    }

    #[test]
    fn chunk_serializes_openai_shape() {
        let chunk = OpenAiChatChunk::from_runner_chunk(
            "cmpl-1",
            &RunnerOutputChunk {
                delta: Some("Hel".into()),
                ..Default::default()
            },
        );
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["choices"][0]["delta"]["content"], "Hel");
        assert!(json["choices"][0]["finish_reason"].is_null());
    }
}
