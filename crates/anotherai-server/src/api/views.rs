//! Views and view folders.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use anotherai::domain::{Graph, View, ViewFolder};
use anotherai::utils::uuid7;

use crate::lifecycle::AppState;

use super::errors::ApiResult;
use super::authenticated_tenant;

#[derive(Debug, Deserialize)]
pub struct ListViewsQuery {
    #[serde(default = "default_true")]
    pub include_views: bool,
}

fn default_true() -> bool {
    true
}

/// `GET /v1/views`: folders with their views; the implicit folder `""`
/// holds views without one.
pub async fn list_view_folders(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListViewsQuery>,
) -> ApiResult<Json<Vec<ViewFolder>>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let folders = state
        .postgres
        .for_tenant(tenant.uid)
        .list_view_folders(query.include_views)
        .await?;
    Ok(Json(folders))
}

/// `POST /v1/views`: create or replace.
pub async fn create_view(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(mut view): Json<View>,
) -> ApiResult<Json<View>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    if view.id.is_empty() {
        view.id = uuid7::uuid7().to_string();
    }
    state
        .postgres
        .for_tenant(tenant.uid)
        .create_or_replace_view(&view)
        .await?;
    Ok(Json(view))
}

/// `GET /v1/views/{id}`.
pub async fn get_view(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<View>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let view = state
        .postgres
        .for_tenant(tenant.uid)
        .retrieve_view(&id)
        .await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
pub struct PatchViewRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub graph: Option<Graph>,
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub position: Option<i32>,
}

/// `PATCH /v1/views/{id}`.
pub async fn patch_view(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<PatchViewRequest>,
) -> ApiResult<Json<View>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let store = state.postgres.for_tenant(tenant.uid);
    store
        .update_view(
            &id,
            patch.title.as_deref(),
            patch.query.as_deref(),
            patch.graph.as_ref(),
            patch.folder_id.as_deref(),
            patch.position,
        )
        .await?;
    Ok(Json(store.retrieve_view(&id).await?))
}

/// `DELETE /v1/views/{id}`.
pub async fn delete_view(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    state
        .postgres
        .for_tenant(tenant.uid)
        .delete_view(&id)
        .await?;
    Ok(Json(serde_json::json!({"deleted": true})))
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    pub name: String,
}

/// `POST /v1/view-folders`.
pub async fn create_folder(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateFolderRequest>,
) -> ApiResult<Json<ViewFolder>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let folder = ViewFolder {
        id: uuid7::uuid7().to_string(),
        name: request.name,
        views: None,
    };
    state
        .postgres
        .for_tenant(tenant.uid)
        .create_view_folder(&folder)
        .await?;
    Ok(Json(folder))
}

#[derive(Debug, Deserialize)]
pub struct PatchFolderRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// `PATCH /v1/view-folders/{id}`.
pub async fn patch_folder(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<PatchFolderRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    state
        .postgres
        .for_tenant(tenant.uid)
        .update_folder(&id, patch.name.as_deref())
        .await?;
    Ok(Json(serde_json::json!({"updated": true})))
}

#[derive(Debug, Deserialize)]
pub struct DeleteFolderQuery {
    #[serde(default)]
    pub delete_views: bool,
}

/// `DELETE /v1/view-folders/{id}`.
pub async fn delete_folder(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<DeleteFolderQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    state
        .postgres
        .for_tenant(tenant.uid)
        .delete_folder(&id, query.delete_views)
        .await?;
    Ok(Json(serde_json::json!({"deleted": true})))
}
