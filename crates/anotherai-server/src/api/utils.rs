//! Utility endpoints: template variable extraction and the model catalog.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use anotherai::models;
use anotherai::templates::extract_variables as extract;

use crate::lifecycle::AppState;

use super::errors::ApiResult;
use super::models::{OpenAiContent, OpenAiMessage};

#[derive(Debug, Deserialize)]
pub struct ExtractVariablesRequest {
    pub messages: Vec<OpenAiMessage>,
    #[serde(default)]
    pub base_schema: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ExtractVariablesResponse {
    pub json_schema: Option<Value>,
    pub last_templated_index: i64,
}

/// `POST /v1/utils/extract_variables`: derive the input JSON-Schema from
/// templated messages.
pub async fn extract_variables(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExtractVariablesRequest>,
) -> ApiResult<Json<ExtractVariablesResponse>> {
    let messages: Vec<anotherai::domain::Message> = request
        .messages
        .iter()
        .map(|m| {
            let text = match &m.content {
                Some(OpenAiContent::Text(text)) => text.clone(),
                Some(OpenAiContent::Parts(parts)) => parts
                    .iter()
                    .filter_map(|p| match p {
                        super::models::OpenAiContentPart::Text { text } => Some(text.as_str()),
                        super::models::OpenAiContentPart::ImageUrl { .. } => None,
                    })
                    .collect::<Vec<_>>()
                    .join(""),
                None => String::new(),
            };
            anotherai::domain::Message::with_text(anotherai::domain::Role::User, text)
        })
        .collect();

    let extracted = extract(&state.templates, &messages, request.base_schema.as_ref());
    Ok(Json(ExtractVariablesResponse {
        json_schema: extracted.json_schema,
        last_templated_index: extracted.last_templated_index,
    }))
}

#[derive(Debug, Serialize)]
pub struct ModelEntry {
    pub id: &'static str,
    pub display_name: &'static str,
    pub providers: Vec<&'static str>,
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub prompt_usd_per_million: f64,
    pub completion_usd_per_million: f64,
    pub supports_reasoning: bool,
    pub supports_structured_output: bool,
}

/// `GET /v1/models`.
pub async fn list_models() -> Json<Vec<ModelEntry>> {
    Json(
        models::all_models()
            .map(|m| ModelEntry {
                id: m.id,
                display_name: m.display_name,
                providers: m.providers.iter().map(|p| p.as_str()).collect(),
                context_window: m.context_window,
                max_output_tokens: m.max_output_tokens,
                prompt_usd_per_million: m.pricing.prompt_usd_per_million,
                completion_usd_per_million: m.pricing.completion_usd_per_million,
                supports_reasoning: m.reasoning.is_some(),
                supports_structured_output: m.supports_structured_output,
            })
            .collect(),
    )
}
