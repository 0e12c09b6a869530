//! The chat-completions endpoint: streaming or buffered inference.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::warn;

use anotherai::domain::{metadata_keys, Agent, CompletionSource};
use anotherai::error::Result;
use anotherai::ids::{sanitize_id, IdType};
use anotherai::runner::{CompletionRequest, RunnerReply};

use crate::lifecycle::AppState;

use super::errors::ApiResult;
use super::models::{OpenAiChatChunk, OpenAiChatRequest, OpenAiChatResponse};
use super::authenticated_tenant;

/// `POST /v1/chat/completions` (and its slash-mangled aliases).
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<OpenAiChatRequest>,
) -> ApiResult<Response> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let mut runner_request = request.to_runner_request(CompletionSource::Api)?;
    // Non-billable runs (preserve_credits) bypass the credit gate.
    if !runner_request.non_billable() {
        crate::security::SecurityService::ensure_credits(&tenant)?;
    }
    resolve_deployment(&state, tenant.uid, &mut runner_request).await?;

    let mut agent = Agent {
        id: request.agent_id().to_string(),
        ..Default::default()
    };
    state
        .postgres
        .for_tenant(tenant.uid)
        .store_agent(&mut agent)
        .await?;

    match state.runner.run(tenant.uid, agent, runner_request).await? {
        RunnerReply::Completion(completion) => {
            Ok(Json(OpenAiChatResponse::from_completion(&completion)).into_response())
        }
        RunnerReply::Stream(stream) => {
            let id = format!("chatcmpl-{}", anotherai::utils::uuid7::uuid7());
            Ok(sse_response(id, stream).into_response())
        }
    }
}

/// A model of the form `anotherai/deployment/<id>` pins the request to
/// the deployment's version.
async fn resolve_deployment(
    state: &AppState,
    tenant_uid: i64,
    request: &mut CompletionRequest,
) -> Result<()> {
    let (kind, _) = anotherai::ids::extract_id(&request.model);
    if kind != Some(IdType::Deployment) {
        return Ok(());
    }
    let deployment_id = sanitize_id(&request.model, IdType::Deployment)?;
    let deployment = state
        .postgres
        .for_tenant(tenant_uid)
        .get_deployment(&deployment_id)
        .await?;
    let version = deployment.version;
    request.model = version.model;
    request.provider = request.provider.or(version.provider);
    request.temperature = request.temperature.or(version.temperature);
    request.top_p = request.top_p.or(version.top_p);
    request.max_output_tokens = request.max_output_tokens.or(version.max_output_tokens);
    request.reasoning_effort = request.reasoning_effort.or(version.reasoning_effort);
    request.reasoning_budget = request.reasoning_budget.or(version.reasoning_budget);
    if request.output_schema.is_none() {
        request.output_schema = version.output_schema;
    }
    if let Some(prompt) = version.prompt {
        if !prompt.is_empty() && request.variables.is_some() {
            request.messages = prompt;
        }
    }
    request.metadata.insert(
        metadata_keys::DEPLOYMENT_ID.to_string(),
        serde_json::Value::String(deployment_id),
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct StreamErrorFrame {
    error: anotherai::ErrorPayload,
}

/// Serialize runner chunks as SSE `data:` frames terminated by `[DONE]`.
/// Mid-stream errors become an error frame rather than a dropped
/// connection.
fn sse_response(
    id: String,
    stream: anotherai::runner::RunnerChunkStream,
) -> Sse<impl Stream<Item = std::result::Result<SseEvent, Infallible>>> {
    let frames = stream
        .map(move |item| {
            let frame = match item {
                Ok(chunk) => SseEvent::default()
                    .json_data(OpenAiChatChunk::from_runner_chunk(&id, &chunk)),
                Err(e) => {
                    warn!(error = %e, "error during streaming");
                    SseEvent::default().json_data(StreamErrorFrame {
                        error: e.to_payload(),
                    })
                }
            };
            Ok(frame.unwrap_or_default())
        })
        .chain(futures::stream::once(async {
            Ok(SseEvent::default().data("[DONE]"))
        }));
    Sse::new(frames)
}
