//! Agent listing/creation and API key management.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use anotherai::domain::{Agent, ApiKey, CompleteApiKey, Page};

use crate::lifecycle::AppState;

use super::errors::ApiResult;
use super::authenticated_tenant;

/// `GET /v1/agents`.
pub async fn list_agents(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Page<Agent>>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let agents = state.postgres.for_tenant(tenant.uid).list_agents().await?;
    let total = agents.len() as u64;
    Ok(Json(Page::new(agents, Some(total), None)))
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// `POST /v1/agents`.
pub async fn create_agent(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateAgentRequest>,
) -> ApiResult<Json<Agent>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let mut agent = Agent {
        id: request.id,
        name: request.name.unwrap_or_default(),
        ..Default::default()
    };
    state
        .postgres
        .for_tenant(tenant.uid)
        .store_agent(&mut agent)
        .await?;
    Ok(Json(agent))
}

/// `GET /v1/organization/keys`.
pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<Page<ApiKey>>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let keys = state.postgres.list_api_keys(tenant.uid).await?;
    let total = keys.len() as u64;
    Ok(Json(Page::new(keys, Some(total), None)))
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    #[serde(default)]
    pub created_by: String,
}

/// `POST /v1/organization/keys`. The clear-text secret appears in this
/// response only.
pub async fn create_api_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateApiKeyRequest>,
) -> ApiResult<Json<CompleteApiKey>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let key = state
        .postgres
        .create_api_key(tenant.uid, &request.name, &request.created_by)
        .await?;
    Ok(Json(key))
}

/// `DELETE /v1/organization/keys/{id}`.
pub async fn delete_api_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    state.postgres.delete_api_key(tenant.uid, &id).await?;
    Ok(Json(serde_json::json!({"deleted": true})))
}
