//! Error rendering: every error leaves as
//! `{"error": {"code", "message", "status_code"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use anotherai::error::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = self.0.to_payload();
        if payload.status_code >= 500 {
            error!(code = payload.code, message = payload.message, "request failed");
        }
        let status =
            StatusCode::from_u16(payload.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({"error": payload}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_carries_code_and_status() {
        let response = ApiError(Error::BadRequest("missing variable".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
