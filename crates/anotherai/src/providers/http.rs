//! Shared HTTP plumbing for provider adapters.

use std::time::Duration;

use crate::domain::Provider;
use crate::error::{Error, Result};

/// Build the reqwest client adapters share. Connect timeout is bounded;
/// the total timeout is left to the per-request deadline so streams can
/// run long.
pub fn create_llm_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| Error::internal(format!("failed to build HTTP client: {e}")))
}

/// Map a transport-level failure (connect, timeout, body read) to a
/// retryable provider error.
pub fn map_transport_error(provider: Provider, e: &reqwest::Error) -> Error {
    Error::ProviderTransient {
        provider,
        message: format!("request failed: {e}"),
        provider_status: None,
    }
}

/// Classify a non-success HTTP response from an OpenAI-shaped provider.
///
/// 429 and 5xx are retryable; auth and client errors are terminal with the
/// provider status passed through. `retry-after` is surfaced in the
/// message when present.
pub fn map_http_error(
    provider: Provider,
    status: u16,
    retry_after: Option<&str>,
    message: &str,
) -> Error {
    let message = message.trim();
    let message = if message.is_empty() {
        "Unknown error".to_string()
    } else {
        message.to_string()
    };
    let message = match retry_after {
        Some(v) if !v.trim().is_empty() => format!("{message} (retry_after={})", v.trim()),
        _ => message,
    };

    if status == 429 || status >= 500 {
        return Error::ProviderTransient {
            provider,
            message,
            provider_status: Some(status),
        };
    }
    Error::ProviderTerminal {
        provider,
        message,
        provider_status: Some(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        for status in [429, 500, 502, 503, 529] {
            let e = map_http_error(Provider::Groq, status, None, "err");
            assert!(e.retryable(), "status {status} should be retryable");
        }
    }

    #[test]
    fn client_errors_are_terminal_and_pass_through() {
        let e = map_http_error(Provider::OpenAi, 401, None, "bad key");
        assert!(!e.retryable());
        assert_eq!(e.status_code(), 401);

        let e = map_http_error(Provider::OpenAi, 400, None, "bad request");
        assert_eq!(e.status_code(), 400);
    }

    #[test]
    fn retry_after_is_surfaced() {
        let e = map_http_error(Provider::Groq, 429, Some("17"), "rate limited");
        assert!(e.to_string().contains("retry_after=17"));
    }
}
