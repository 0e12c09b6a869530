//! Experiment composition endpoints (C9).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use anotherai::domain::{
    Experiment, ExperimentInput, ExperimentVersion, Page,
};
use anotherai::error::Error;
use anotherai::events::{Event, EventPayload};
use anotherai::ids::{sanitize_id, IdType};
use anotherai::utils::uuid7;
use anotherai_postgres::CompletionIdTuple;

use crate::config::APP_URL;
use crate::lifecycle::AppState;

use super::errors::ApiResult;
use super::authenticated_tenant;

#[derive(Debug, Deserialize)]
pub struct CreateExperimentRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub agent_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub use_cache: Option<anotherai::domain::CacheUsage>,
    #[serde(default)]
    pub metadata: Option<std::collections::BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
pub struct ExperimentResponse {
    #[serde(flatten)]
    pub experiment: Experiment,
    pub url: String,
}

fn experiment_url(id: &str) -> String {
    format!("{APP_URL}/experiments/{id}")
}

/// `POST /v1/experiments`.
pub async fn create_experiment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateExperimentRequest>,
) -> ApiResult<Json<ExperimentResponse>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let experiment = Experiment {
        id: request.id.unwrap_or_else(|| uuid7::uuid7().to_string()),
        agent_id: request.agent_id,
        title: request.title,
        description: request.description,
        author_name: request.author_name,
        use_cache: request.use_cache,
        metadata: request.metadata,
        ..Default::default()
    };
    state
        .postgres
        .for_tenant(tenant.uid)
        .create_experiment(&experiment)
        .await?;
    let url = experiment_url(&experiment.id);
    Ok(Json(ExperimentResponse { experiment, url }))
}

/// `GET /v1/experiments/{id}`.
pub async fn get_experiment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<ExperimentResponse>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let id = sanitize_id(&id, IdType::Experiment)?;
    let experiment = state
        .postgres
        .for_tenant(tenant.uid)
        .get_experiment(&id, true)
        .await?;
    let url = experiment_url(&experiment.id);
    Ok(Json(ExperimentResponse { experiment, url }))
}

#[derive(Debug, Deserialize)]
pub struct ListExperimentsQuery {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// `GET /v1/experiments`.
pub async fn list_experiments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListExperimentsQuery>,
) -> ApiResult<Json<Page<Experiment>>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let experiments = state
        .postgres
        .for_tenant(tenant.uid)
        .list_experiments(query.agent_id.as_deref(), None, query.limit, query.offset)
        .await?;
    Ok(Json(Page::new(experiments, None, None)))
}

/// `DELETE /v1/experiments/{id}`.
pub async fn delete_experiment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    state
        .postgres
        .for_tenant(tenant.uid)
        .delete_experiment(&id)
        .await?;
    Ok(Json(serde_json::json!({"deleted": true})))
}

#[derive(Debug, Deserialize)]
pub struct AddInputsRequest {
    pub inputs: Vec<ExperimentInput>,
}

#[derive(Debug, Serialize)]
pub struct AddedIdsResponse {
    /// Ids actually inserted; duplicates were silently ignored.
    pub added: Vec<String>,
}

/// `POST /v1/experiments/{id}/inputs`.
pub async fn add_inputs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<AddInputsRequest>,
) -> ApiResult<Json<AddedIdsResponse>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let inputs: Vec<ExperimentInput> = request
        .inputs
        .into_iter()
        .map(|mut i| {
            i.input = i.input.normalized();
            i
        })
        .collect();
    let added = state
        .postgres
        .for_tenant(tenant.uid)
        .add_experiment_inputs(&id, &inputs)
        .await?;
    Ok(Json(AddedIdsResponse {
        added: added.into_iter().collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct AddVersionsRequest {
    pub versions: Vec<ExperimentVersion>,
}

/// `POST /v1/experiments/{id}/versions`.
pub async fn add_versions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<AddVersionsRequest>,
) -> ApiResult<Json<AddedIdsResponse>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let versions: Vec<ExperimentVersion> = request
        .versions
        .into_iter()
        .map(|mut v| {
            v.version = v.version.assign_id();
            v
        })
        .collect();
    let added = state
        .postgres
        .for_tenant(tenant.uid)
        .add_experiment_versions(&id, &versions)
        .await?;
    Ok(Json(AddedIdsResponse {
        added: added.into_iter().collect(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct AddCompletionsRequest {
    pub completions: Vec<AddCompletionItem>,
    /// Start the registered completions in the background right away.
    #[serde(default)]
    pub start: bool,
}

#[derive(Debug, Deserialize)]
pub struct AddCompletionItem {
    #[serde(default)]
    pub completion_id: Option<Uuid>,
    pub input_id: String,
    pub version_id: String,
}

/// `POST /v1/experiments/{id}/completions`: register `(input, version)`
/// cells, optionally kicking off their runs.
pub async fn add_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<AddCompletionsRequest>,
) -> ApiResult<Json<AddedIdsResponse>> {
    let tenant = authenticated_tenant(&state, &headers).await?;
    let completions: Vec<CompletionIdTuple> = request
        .completions
        .iter()
        .map(|item| {
            Ok(CompletionIdTuple {
                completion_id: item.completion_id.unwrap_or_else(uuid7::uuid7),
                input_id: sanitize_id(&item.input_id, IdType::Input)?,
                version_id: sanitize_id(&item.version_id, IdType::Version)?,
            })
        })
        .collect::<Result<_, Error>>()?;

    let added = state
        .postgres
        .for_tenant(tenant.uid)
        .add_experiment_completions(&id, &completions)
        .await?;

    if request.start {
        for completion in completions.iter().filter(|c| added.contains(&c.completion_id)) {
            state.events.send(Event::new(
                tenant.uid,
                EventPayload::StartExperimentCompletion {
                    experiment_id: id.clone(),
                    completion_id: completion.completion_id,
                    version_id: completion.version_id.clone(),
                    input_id: completion.input_id.clone(),
                },
            ));
        }
    }

    Ok(Json(AddedIdsResponse {
        added: added.into_iter().map(|id| id.to_string()).collect(),
    }))
}
