//! Completion import, retrieval and tenant-scoped SQL.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use anotherai::domain::{Agent, AgentCompletion, CompletionSource, CompletionStatus};
use anotherai::error::Error;
use anotherai::events::Event;
use anotherai::ids::{sanitize_id, IdType};
use anotherai::utils::uuid7;

use crate::config::APP_URL;
use crate::lifecycle::AppState;

use super::errors::ApiResult;
use super::models::{completion_url, ImportCompletionRequest, ImportCompletionResponse};
use super::authenticated_tenant;

/// `POST /v1/completions`: import an already-computed completion record
/// (shadow testing, backfills).
pub async fn import_completion(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ImportCompletionRequest>,
) -> ApiResult<Json<ImportCompletionResponse>> {
    let tenant = authenticated_tenant(&state, &headers).await?;

    let id = match &request.id {
        Some(raw) => {
            let bare = sanitize_id(raw, IdType::Completion)?;
            bare.parse::<Uuid>()
                .map_err(|_| Error::BadRequest(format!("Invalid completion id: {raw}")))?
        }
        None => uuid7::uuid7(),
    };

    let mut agent = Agent {
        id: request.agent_id.clone(),
        ..Default::default()
    };
    state
        .postgres
        .for_tenant(tenant.uid)
        .store_agent(&mut agent)
        .await?;

    let version = request.version.clone().assign_id();
    let input = request.input.clone().normalized();
    let status = if request.output.error.is_some() {
        CompletionStatus::Failure
    } else {
        CompletionStatus::Success
    };
    let completion = AgentCompletion {
        id,
        agent,
        agent_input: input,
        agent_output: request.output.clone(),
        messages: request.messages.clone().unwrap_or_default(),
        version,
        status,
        duration_seconds: request.duration_seconds,
        cost_usd: request.cost_usd,
        traces: vec![],
        from_cache: false,
        preserve_credits: false,
        source: CompletionSource::Api,
        metadata: request.metadata.clone(),
    };

    state
        .events
        .send(Event::store_completion(tenant.uid, completion));

    Ok(Json(ImportCompletionResponse {
        id,
        url: completion_url(id),
    }))
}

/// Wire shape of a fetched completion.
#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    #[serde(flatten)]
    pub completion: AgentCompletion,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub url: String,
}

/// `GET /v1/completions/{id}`.
pub async fn get_completion(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<CompletionResponse>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let bare = sanitize_id(&id, IdType::Completion)?;
    let completion_id = bare
        .parse::<Uuid>()
        .map_err(|_| Error::BadRequest(format!("Invalid completion id: {id}")))?;
    let completion = state
        .clickhouse
        .for_tenant(tenant.uid)
        .completion_by_id(completion_id)
        .await?;
    Ok(Json(CompletionResponse {
        created_at: completion.created_at(),
        url: completion_url(completion.id),
        completion,
    }))
}

#[derive(Debug, Deserialize)]
pub struct QueryCompletionsRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct QueryCompletionsResponse {
    pub rows: Vec<Value>,
    pub url: String,
}

/// `POST /v1/completions/query`: arbitrary SQL through the per-tenant
/// read-only user.
pub async fn query_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<QueryCompletionsRequest>,
) -> ApiResult<Json<QueryCompletionsResponse>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let rows = state
        .clickhouse
        .for_tenant(tenant.uid)
        .raw_query(&request.query)
        .await?;
    let encoded = urlencode(&request.query);
    Ok(Json(QueryCompletionsResponse {
        rows,
        url: format!("{APP_URL}/completions?query={encoded}"),
    }))
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_url_is_form_encoded() {
        assert_eq!(urlencode("SELECT 1 + 2"), "SELECT+1+%2B+2");
    }
}
