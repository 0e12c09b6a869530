//! Deployment endpoints: alias → version bindings.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use anotherai::domain::{
    page_token_from_datetime, page_token_to_datetime, Deployment, Page, Version,
};

use crate::config::APP_URL;
use crate::lifecycle::AppState;

use super::errors::ApiResult;
use super::authenticated_tenant;

#[derive(Debug, Deserialize)]
pub struct UpsertDeploymentRequest {
    pub id: String,
    pub agent_id: String,
    pub version: Version,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub metadata: Option<std::collections::BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
pub struct DeploymentResponse {
    #[serde(flatten)]
    pub deployment: Deployment,
    pub url: String,
}

fn deployment_url(id: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(id.as_bytes()).collect();
    format!("{APP_URL}/deployments/{encoded}")
}

/// `POST /v1/deployments`: create or rotate the version pointer.
pub async fn upsert_deployment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<UpsertDeploymentRequest>,
) -> ApiResult<Json<DeploymentResponse>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let deployment = Deployment {
        id: request.id,
        agent_id: request.agent_id,
        version: request.version.assign_id(),
        created_by: request.created_by,
        metadata: request.metadata,
        ..Default::default()
    };
    let stored = state
        .postgres
        .for_tenant(tenant.uid)
        .upsert_deployment(&deployment)
        .await?;
    let url = deployment_url(&stored.id);
    Ok(Json(DeploymentResponse {
        deployment: stored,
        url,
    }))
}

/// `GET /v1/deployments/{id}`.
pub async fn get_deployment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<DeploymentResponse>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let deployment = state
        .postgres
        .for_tenant(tenant.uid)
        .get_deployment(&id)
        .await?;
    let url = deployment_url(&deployment.id);
    Ok(Json(DeploymentResponse { deployment, url }))
}

#[derive(Debug, Deserialize)]
pub struct ListDeploymentsQuery {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    30
}

/// `GET /v1/deployments`: newest first, cursor = timestamp of the last
/// item.
pub async fn list_deployments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListDeploymentsQuery>,
) -> ApiResult<Json<Page<Deployment>>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let created_before = query
        .page_token
        .as_deref()
        .map(page_token_to_datetime)
        .transpose()?;
    let store = state.postgres.for_tenant(tenant.uid);
    let deployments = store
        .list_deployments(
            query.agent_id.as_deref(),
            created_before,
            query.include_archived,
            query.limit,
        )
        .await?;
    let total = store
        .count_deployments(query.agent_id.as_deref(), query.include_archived)
        .await
        .unwrap_or(0);
    let next_page_token = deployments
        .last()
        .filter(|_| deployments.len() as i64 == query.limit)
        .map(|d| page_token_from_datetime(d.created_at));
    Ok(Json(Page::new(deployments, Some(total), next_page_token)))
}

/// `DELETE /v1/deployments/{id}`: archive (never hard-delete).
pub async fn archive_deployment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    state
        .postgres
        .for_tenant(tenant.uid)
        .archive_deployment(&id)
        .await?;
    Ok(Json(serde_json::json!({"archived": true})))
}
