//! HTTP surface: routers, wire models and error rendering.

pub mod agents;
pub mod annotations;
pub mod completions;
pub mod deployments;
pub mod errors;
pub mod experiments;
pub mod models;
pub mod probes;
pub mod run;
pub mod utils;
pub mod views;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use anotherai::domain::Tenant;
use anotherai::error::{Error, Result};

use crate::lifecycle::AppState;
use crate::security::SecurityService;

/// Resolve the authenticated tenant from the `Authorization` header.
pub async fn authenticated_tenant(state: &AppState, headers: &HeaderMap) -> Result<Tenant> {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::InvalidToken("missing Authorization header".into()))?;
    let token = SecurityService::token_from_header(authorization)?;
    state.security.find_tenant(token).await
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(run::chat_completions))
        // Some SDKs build the completions url with a doubled slash,
        // others with none at all; both aliases stay routable.
        .route("/v1//chat/completions", post(run::chat_completions))
        .route("/v1chat/completions", post(run::chat_completions))
        .route(
            "/v1/completions",
            post(completions::import_completion),
        )
        .route("/v1/completions/query", post(completions::query_completions))
        .route("/v1/completions/:id", get(completions::get_completion))
        .route("/v1/agents", get(agents::list_agents).post(agents::create_agent))
        .route("/v1/models", get(utils::list_models))
        .route("/v1/utils/extract_variables", post(utils::extract_variables))
        .route("/v1/views", get(views::list_view_folders).post(views::create_view))
        .route(
            "/v1/views/:id",
            get(views::get_view)
                .patch(views::patch_view)
                .delete(views::delete_view),
        )
        .route("/v1/view-folders", post(views::create_folder))
        .route(
            "/v1/view-folders/:id",
            axum::routing::patch(views::patch_folder).delete(views::delete_folder),
        )
        .route(
            "/v1/experiments",
            get(experiments::list_experiments).post(experiments::create_experiment),
        )
        .route(
            "/v1/experiments/:id",
            get(experiments::get_experiment).delete(experiments::delete_experiment),
        )
        .route("/v1/experiments/:id/inputs", post(experiments::add_inputs))
        .route("/v1/experiments/:id/versions", post(experiments::add_versions))
        .route(
            "/v1/experiments/:id/completions",
            post(experiments::add_completions),
        )
        .route(
            "/v1/deployments",
            get(deployments::list_deployments).post(deployments::upsert_deployment),
        )
        .route(
            "/v1/deployments/:id",
            get(deployments::get_deployment).delete(deployments::archive_deployment),
        )
        .route(
            "/v1/annotations",
            get(annotations::list_annotations).post(annotations::create_annotations),
        )
        .route("/v1/annotations/:id", axum::routing::delete(annotations::delete_annotation))
        .route(
            "/v1/organization/keys",
            get(agents::list_api_keys).post(agents::create_api_key),
        )
        .route(
            "/v1/organization/keys/:id",
            axum::routing::delete(agents::delete_api_key),
        )
        .merge(probes::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
