//! Annotation endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use anotherai::domain::{Annotation, Page};
use anotherai::utils::uuid7;

use crate::lifecycle::AppState;

use super::errors::ApiResult;
use super::authenticated_tenant;

#[derive(Debug, Deserialize)]
pub struct CreateAnnotationsRequest {
    pub annotations: Vec<Annotation>,
}

/// `POST /v1/annotations`: create a batch.
pub async fn create_annotations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateAnnotationsRequest>,
) -> ApiResult<Json<Page<Annotation>>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let store = state.clickhouse.for_tenant(tenant.uid);
    let now = chrono::Utc::now();
    let mut stored = Vec::with_capacity(request.annotations.len());
    for mut annotation in request.annotations {
        if annotation.id.is_empty() {
            annotation.id = uuid7::uuid7().to_string();
        }
        if annotation.created_at.timestamp() == 0 {
            annotation.created_at = now;
        }
        store.store_annotation(&annotation).await?;
        stored.push(annotation);
    }
    let total = stored.len() as u64;
    Ok(Json(Page::new(stored, Some(total), None)))
}

#[derive(Debug, Deserialize)]
pub struct ListAnnotationsQuery {
    #[serde(default)]
    pub experiment_id: Option<String>,
    #[serde(default)]
    pub completion_id: Option<Uuid>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

fn default_limit() -> u64 {
    100
}

/// `GET /v1/annotations`.
pub async fn list_annotations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListAnnotationsQuery>,
) -> ApiResult<Json<Page<Annotation>>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let annotations = state
        .clickhouse
        .for_tenant(tenant.uid)
        .list_annotations(
            query.experiment_id.as_deref(),
            query.completion_id,
            query.agent_id.as_deref(),
            None,
            query.limit,
        )
        .await?;
    Ok(Json(Page::new(annotations, None, None)))
}

/// `DELETE /v1/annotations/{id}`.
pub async fn delete_annotation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    state
        .clickhouse
        .for_tenant(tenant.uid)
        .delete_annotation(&id)
        .await?;
    Ok(Json(serde_json::json!({"deleted": true})))
}
