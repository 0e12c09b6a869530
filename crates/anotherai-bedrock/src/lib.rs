//! Amazon Bedrock provider adapter, speaking the Converse API.
//!
//! Bedrock addresses models through region-scoped resource ids
//! (`anthropic.claude-...`), so the adapter carries a model → resource-id
//! map, configured through `AWS_BEDROCK_RESOURCE_ID_MODEL_MAP`.

use std::collections::HashMap;

use async_stream::try_stream;
use async_trait::async_trait;
use aws_sdk_bedrockruntime::types::{
    AnyToolChoice, AutoToolChoice, ContentBlock as BedrockContentBlock, ContentBlockDelta,
    ContentBlockStart, ConversationRole, ConverseStreamOutput, InferenceConfiguration,
    Message as BedrockMessage, SpecificToolChoice, SystemContentBlock, Tool as BedrockTool,
    ToolChoice as BedrockToolChoice, ToolConfiguration, ToolInputSchema, ToolResultBlock,
    ToolResultContentBlock, ToolSpecification, ToolUseBlock,
};
use aws_sdk_bedrockruntime::Client as BedrockClient;
use aws_smithy_types::Document;
use serde_json::Value;

use anotherai::domain::{Message, Provider, Role, ToolCallRequest, ToolChoice};
use anotherai::error::{Error, Result};
use anotherai::providers::{
    ChunkStream, LlmUsage, ParsedChunk, ProviderAdapter, ProviderCompletion, ProviderRequest,
    ToolCallDelta,
};

#[derive(Clone)]
pub struct BedrockAdapter {
    client: BedrockClient,
    /// Model id → Bedrock resource id. Unmapped models pass through as-is.
    resource_id_map: HashMap<String, String>,
}

impl std::fmt::Debug for BedrockAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BedrockAdapter")
            .field("resource_id_map", &self.resource_id_map)
            .finish()
    }
}

impl BedrockAdapter {
    /// Build against the ambient AWS credential chain.
    pub async fn new(resource_id_map: HashMap<String, String>) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        BedrockAdapter {
            client: BedrockClient::new(&config),
            resource_id_map,
        }
    }

    /// Build from `AWS_BEDROCK_RESOURCE_ID_MODEL_MAP` (a JSON object).
    /// Returns `None` when `AWS_BEDROCK_API_KEY` is not configured.
    pub async fn from_env() -> Option<Result<Self>> {
        std::env::var("AWS_BEDROCK_API_KEY").ok()?;
        let map = match std::env::var("AWS_BEDROCK_RESOURCE_ID_MODEL_MAP") {
            Ok(raw) => match serde_json::from_str::<HashMap<String, String>>(&raw) {
                Ok(map) => map,
                Err(e) => {
                    return Some(Err(Error::internal(format!(
                        "invalid AWS_BEDROCK_RESOURCE_ID_MODEL_MAP: {e}"
                    ))))
                }
            },
            Err(_) => HashMap::new(),
        };
        Some(Ok(Self::new(map).await))
    }

    fn resource_id(&self, model: &str) -> String {
        self.resource_id_map
            .get(model)
            .cloned()
            .unwrap_or_else(|| model.to_string())
    }

    fn inference_config(request: &ProviderRequest) -> InferenceConfiguration {
        let mut builder = InferenceConfiguration::builder();
        if let Some(t) = request.temperature {
            builder = builder.temperature(t as f32);
        }
        if let Some(p) = request.top_p {
            builder = builder.top_p(p as f32);
        }
        if let Some(m) = request.max_output_tokens {
            builder = builder.max_tokens(m as i32);
        }
        builder.build()
    }

    fn tool_config(request: &ProviderRequest) -> Result<Option<ToolConfiguration>> {
        let Some(tools) = &request.tools else {
            return Ok(None);
        };
        let mut bedrock_tools = Vec::new();
        for tool in tools {
            let mut spec = ToolSpecification::builder()
                .name(&tool.name)
                .input_schema(ToolInputSchema::Json(json_to_document(&tool.input_schema)));
            if let Some(description) = &tool.description {
                spec = spec.description(description);
            }
            let spec = spec
                .build()
                .map_err(|e| Error::internal(format!("invalid tool specification: {e}")))?;
            bedrock_tools.push(BedrockTool::ToolSpec(spec));
        }

        let mut builder = ToolConfiguration::builder().set_tools(Some(bedrock_tools));
        match &request.tool_choice {
            Some(ToolChoice::Auto) => {
                builder = builder.tool_choice(BedrockToolChoice::Auto(
                    AutoToolChoice::builder().build(),
                ));
            }
            Some(ToolChoice::Required) => {
                builder = builder.tool_choice(BedrockToolChoice::Any(
                    AnyToolChoice::builder().build(),
                ));
            }
            Some(ToolChoice::Function { name }) => {
                builder = builder.tool_choice(BedrockToolChoice::Tool(
                    SpecificToolChoice::builder()
                        .name(name)
                        .build()
                        .map_err(|e| Error::internal(format!("invalid tool choice: {e}")))?,
                ));
            }
            // Converse has no explicit "none"; leaving the choice unset is
            // the closest behavior.
            Some(ToolChoice::None) | None => {}
        }
        builder
            .build()
            .map(Some)
            .map_err(|e| Error::internal(format!("invalid tool configuration: {e}")))
    }

    fn map_sdk_error(message: String) -> Error {
        // Bedrock throttles instead of returning clean 429s; the SDK
        // surfaces that as a ThrottlingException in the display chain.
        let transient = message.contains("ThrottlingException")
            || message.contains("ServiceUnavailable")
            || message.contains("ModelNotReady")
            || message.contains("timeout")
            || message.contains("dispatch failure");
        if transient {
            Error::ProviderTransient {
                provider: Provider::AmazonBedrock,
                message,
                provider_status: None,
            }
        } else {
            Error::ProviderTerminal {
                provider: Provider::AmazonBedrock,
                message,
                provider_status: None,
            }
        }
    }
}

fn convert_messages(
    messages: &[Message],
) -> Result<(Option<Vec<SystemContentBlock>>, Vec<BedrockMessage>)> {
    let mut system = Vec::new();
    let mut out = Vec::new();

    for message in messages {
        match message.role {
            Role::System => system.push(SystemContentBlock::Text(message.text())),
            Role::User | Role::Tool => {
                let mut blocks = Vec::new();
                for part in &message.content {
                    if let Some(text) = &part.text {
                        if !text.is_empty() {
                            blocks.push(BedrockContentBlock::Text(text.clone()));
                        }
                    }
                    if let Some(result) = &part.tool_call_result {
                        let tool_result = ToolResultBlock::builder()
                            .tool_use_id(&result.id)
                            .content(ToolResultContentBlock::Text(result.output_preview()))
                            .build()
                            .map_err(|e| Error::internal(format!("invalid tool result: {e}")))?;
                        blocks.push(BedrockContentBlock::ToolResult(tool_result));
                    }
                }
                if !blocks.is_empty() {
                    out.push(
                        BedrockMessage::builder()
                            .role(ConversationRole::User)
                            .set_content(Some(blocks))
                            .build()
                            .map_err(|e| Error::internal(format!("invalid message: {e}")))?,
                    );
                }
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                for part in &message.content {
                    if let Some(text) = &part.text {
                        if !text.is_empty() {
                            blocks.push(BedrockContentBlock::Text(text.clone()));
                        }
                    }
                    if let Some(object) = &part.object {
                        blocks.push(BedrockContentBlock::Text(object.to_string()));
                    }
                    if let Some(call) = &part.tool_call_request {
                        let tool_use = ToolUseBlock::builder()
                            .tool_use_id(&call.id)
                            .name(&call.tool_name)
                            .input(json_to_document(&call.tool_input_dict))
                            .build()
                            .map_err(|e| Error::internal(format!("invalid tool use: {e}")))?;
                        blocks.push(BedrockContentBlock::ToolUse(tool_use));
                    }
                }
                if !blocks.is_empty() {
                    out.push(
                        BedrockMessage::builder()
                            .role(ConversationRole::Assistant)
                            .set_content(Some(blocks))
                            .build()
                            .map_err(|e| Error::internal(format!("invalid message: {e}")))?,
                    );
                }
            }
        }
    }
    Ok(((!system.is_empty()).then_some(system), out))
}

fn json_to_document(value: &Value) -> Document {
    match value {
        Value::Null => Document::Null,
        Value::Bool(b) => Document::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i >= 0 {
                    Document::Number(aws_smithy_types::Number::PosInt(i as u64))
                } else {
                    Document::Number(aws_smithy_types::Number::NegInt(i))
                }
            } else {
                Document::Number(aws_smithy_types::Number::Float(n.as_f64().unwrap_or(0.0)))
            }
        }
        Value::String(s) => Document::String(s.clone()),
        Value::Array(items) => Document::Array(items.iter().map(json_to_document).collect()),
        Value::Object(map) => Document::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_document(v)))
                .collect(),
        ),
    }
}

fn document_to_json(doc: &Document) -> Value {
    match doc {
        Document::Null => Value::Null,
        Document::Bool(b) => Value::Bool(*b),
        Document::Number(n) => match n {
            aws_smithy_types::Number::PosInt(i) => Value::from(*i),
            aws_smithy_types::Number::NegInt(i) => Value::from(*i),
            aws_smithy_types::Number::Float(f) => {
                serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null)
            }
        },
        Document::String(s) => Value::String(s.clone()),
        Document::Array(items) => Value::Array(items.iter().map(document_to_json).collect()),
        Document::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), document_to_json(v)))
                .collect(),
        ),
    }
}

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
    fn name(&self) -> Provider {
        Provider::AmazonBedrock
    }

    fn default_model(&self) -> &'static str {
        "claude-3-5-haiku"
    }

    fn required_env(&self) -> &'static [&'static str] {
        &["AWS_BEDROCK_API_KEY", "AWS_BEDROCK_RESOURCE_ID_MODEL_MAP"]
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderCompletion> {
        let (system, messages) = convert_messages(&request.messages)?;
        let mut call = self
            .client
            .converse()
            .model_id(self.resource_id(&request.model))
            .set_system(system)
            .set_messages(Some(messages))
            .inference_config(Self::inference_config(request));
        if let Some(config) = Self::tool_config(request)? {
            call = call.tool_config(config);
        }

        let response = call
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(format!("Bedrock converse failed: {e}")))?;

        let mut completion = ProviderCompletion {
            finish_reason: Some(response.stop_reason.as_str().to_string()),
            ..Default::default()
        };
        if let Some(usage) = &response.usage {
            completion.usage = LlmUsage {
                prompt_token_count: Some(f64::from(usage.input_tokens)),
                completion_token_count: Some(f64::from(usage.output_tokens)),
                ..Default::default()
            };
        }
        if let Some(aws_sdk_bedrockruntime::types::ConverseOutput::Message(message)) =
            response.output
        {
            let mut text = String::new();
            for block in message.content {
                match block {
                    BedrockContentBlock::Text(t) => text.push_str(&t),
                    BedrockContentBlock::ToolUse(tool_use) => {
                        completion.tool_call_requests.push(ToolCallRequest::new(
                            Some(tool_use.tool_use_id),
                            tool_use.name,
                            document_to_json(&tool_use.input),
                        ));
                    }
                    _ => {}
                }
            }
            completion.text = (!text.is_empty()).then_some(text);
        }
        Ok(completion)
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream> {
        let (system, messages) = convert_messages(&request.messages)?;
        let mut call = self
            .client
            .converse_stream()
            .model_id(self.resource_id(&request.model))
            .set_system(system)
            .set_messages(Some(messages))
            .inference_config(Self::inference_config(request));
        if let Some(config) = Self::tool_config(request)? {
            call = call.tool_config(config);
        }

        let output = call
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(format!("Bedrock converse stream failed: {e}")))?;
        let mut stream = output.stream;

        let chunks = try_stream! {
            loop {
                let event = stream.recv().await.map_err(|e| {
                    Self::map_sdk_error(format!("Bedrock stream receive failed: {e}"))
                })?;
                let Some(event) = event else { break };
                match event {
                    ConverseStreamOutput::ContentBlockStart(start) => {
                        if let Some(ContentBlockStart::ToolUse(tool_use)) = start.start {
                            yield ParsedChunk {
                                tool_calls: vec![ToolCallDelta {
                                    index: start.content_block_index as usize,
                                    id: Some(tool_use.tool_use_id),
                                    name: Some(tool_use.name),
                                    arguments: String::new(),
                                }],
                                ..Default::default()
                            };
                        }
                    }
                    ConverseStreamOutput::ContentBlockDelta(delta_event) => {
                        match delta_event.delta {
                            Some(ContentBlockDelta::Text(text)) => {
                                yield ParsedChunk { delta: Some(text), ..Default::default() };
                            }
                            Some(ContentBlockDelta::ToolUse(tool_delta)) => {
                                yield ParsedChunk {
                                    tool_calls: vec![ToolCallDelta {
                                        index: delta_event.content_block_index as usize,
                                        id: None,
                                        name: None,
                                        arguments: tool_delta.input,
                                    }],
                                    ..Default::default()
                                };
                            }
                            _ => {}
                        }
                    }
                    ConverseStreamOutput::MessageStop(stop) => {
                        yield ParsedChunk {
                            finish_reason: Some(stop.stop_reason.as_str().to_string()),
                            ..Default::default()
                        };
                    }
                    ConverseStreamOutput::Metadata(metadata) => {
                        if let Some(usage) = metadata.usage {
                            yield ParsedChunk {
                                usage: Some(LlmUsage {
                                    prompt_token_count: Some(f64::from(usage.input_tokens)),
                                    completion_token_count: Some(f64::from(usage.output_tokens)),
                                    ..Default::default()
                                }),
                                ..Default::default()
                            };
                        }
                    }
                    _ => {}
                }
            }
        };
        Ok(Box::pin(chunks))
    }
}
