//! Health probes and well-known OAuth descriptors.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Redirect;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::config::{API_URL, AUTHORIZATION_SERVER};
use crate::lifecycle::AppState;

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn oauth_protected_resource() -> Json<serde_json::Value> {
    Json(json!({
        "resource": format!("{API_URL}/mcp"),
        "authorization_servers": [AUTHORIZATION_SERVER],
        "scopes_supported": ["openid", "email", "profile"],
        "resource_name": "AnotherAI",
        "resource_documentation": format!("{API_URL}/mcp"),
        "bearer_methods_supported": ["header"],
    }))
}

async fn oauth_authorization_server() -> Redirect {
    Redirect::temporary(&format!(
        "{AUTHORIZATION_SERVER}/.well-known/oauth-authorization-server"
    ))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/probes/health", get(health).head(health))
        .route("/probes/readiness", get(health))
        .route(
            "/.well-known/oauth-protected-resource",
            get(oauth_protected_resource).options(oauth_protected_resource),
        )
        .route(
            "/.well-known/oauth-protected-resource/mcp",
            get(oauth_protected_resource),
        )
        .route(
            "/.well-known/oauth-authorization-server",
            get(oauth_authorization_server).options(oauth_authorization_server),
        )
        .route(
            "/.well-known/oauth-authorization-server/mcp",
            get(oauth_authorization_server),
        )
}
