//! Canonical error kinds for the gateway.
//!
//! Every fallible path in the workspace converges on [`Error`]. The HTTP
//! layer renders it as `{"error": {code, message, status_code}}`; the
//! completion runner uses [`Error::retryable`] to decide whether a provider
//! failure advances to the next fallback candidate.

use serde::{Deserialize, Serialize};

use crate::domain::Provider;

/// Result alias used throughout the workspace.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All error kinds the gateway can surface.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Unknown model/provider or otherwise unusable run options.
    #[error("{0}")]
    InvalidRunOptions(String),

    /// Malformed request: missing template variable, invalid id, bad body.
    #[error("{0}")]
    BadRequest(String),

    /// A file url or data payload could not be used.
    #[error("{0}")]
    InvalidFile(String),

    /// Upload larger than the accepted maximum.
    #[error("{0}")]
    EntityTooLarge(String),

    /// JWT or API key verification failed.
    #[error("{0}")]
    InvalidToken(String),

    /// A referenced object does not exist.
    #[error("{object_type} not found")]
    ObjectNotFound {
        /// Kind of the missing object ("agent", "completion", ...).
        object_type: &'static str,
    },

    /// Idempotency conflict: the value already exists.
    #[error("{0}")]
    DuplicateValue(String),

    /// Credit balance exhausted with a recorded payment failure.
    #[error("{0}")]
    PaymentRequired(String),

    /// Transient provider failure: rate limit, network, 5xx. Retryable by
    /// fallback.
    #[error("{provider}: {message}")]
    ProviderTransient {
        provider: Provider,
        message: String,
        /// Status code returned by the provider, when there was a response.
        provider_status: Option<u16>,
    },

    /// Terminal provider failure: content safety, auth, quota. The provider
    /// status code is passed through to the client.
    #[error("{provider}: {message}")]
    ProviderTerminal {
        provider: Provider,
        message: String,
        provider_status: Option<u16>,
    },

    /// Anything unexpected. `fatal` errors are never retried by the worker.
    #[error("{message}")]
    Internal { message: String, fatal: bool },
}

impl Error {
    /// Shorthand for a non-fatal internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
            fatal: false,
        }
    }

    /// Shorthand for a fatal internal error (worker will not retry).
    pub fn fatal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
            fatal: true,
        }
    }

    /// Stable machine-readable code, used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidRunOptions(_) => "invalid_run_options",
            Error::BadRequest(_) => "bad_request",
            Error::InvalidFile(_) => "invalid_file",
            Error::EntityTooLarge(_) => "entity_too_large",
            Error::InvalidToken(_) => "invalid_token",
            Error::ObjectNotFound { .. } => "object_not_found",
            Error::DuplicateValue(_) => "duplicate_value",
            Error::PaymentRequired(_) => "payment_required",
            Error::ProviderTransient { .. } => "provider_unavailable",
            Error::ProviderTerminal { .. } => "provider_error",
            Error::Internal { .. } => "internal_error",
        }
    }

    /// HTTP status the error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidRunOptions(_)
            | Error::BadRequest(_)
            | Error::InvalidFile(_) => 400,
            Error::InvalidToken(_) => 401,
            Error::PaymentRequired(_) => 402,
            Error::ObjectNotFound { .. } => 404,
            Error::DuplicateValue(_) => 409,
            Error::EntityTooLarge(_) => 413,
            Error::ProviderTransient { .. } => 503,
            // Terminal provider errors pass the upstream status through when
            // it denotes a client problem, otherwise act as a bad gateway.
            Error::ProviderTerminal {
                provider_status, ..
            } => match provider_status {
                Some(s) if *s >= 400 && *s < 500 => *s,
                _ => 502,
            },
            Error::Internal { .. } => 500,
        }
    }

    /// Whether the completion runner may advance to the next provider
    /// candidate after this failure.
    pub fn retryable(&self) -> bool {
        matches!(self, Error::ProviderTransient { .. })
    }

    /// Whether the background worker must not retry the task.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Internal { fatal: true, .. })
    }

    /// Serializable form, stored on failed completions and rendered on the
    /// wire.
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
            status_code: self.status_code(),
        }
    }
}

/// The wire/storage representation of an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub status_code: u16,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::internal(format!("serialization error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_terminal_passes_client_status_through() {
        let e = Error::ProviderTerminal {
            provider: Provider::OpenAi,
            message: "content policy".into(),
            provider_status: Some(422),
        };
        assert_eq!(e.status_code(), 422);

        let e = Error::ProviderTerminal {
            provider: Provider::OpenAi,
            message: "upstream exploded".into(),
            provider_status: Some(500),
        };
        assert_eq!(e.status_code(), 502);
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        let transient = Error::ProviderTransient {
            provider: Provider::Groq,
            message: "429".into(),
            provider_status: Some(429),
        };
        assert!(transient.retryable());
        assert!(!Error::BadRequest("nope".into()).retryable());
        assert!(!Error::fatal("boom").retryable());
        assert!(Error::fatal("boom").is_fatal());
        assert!(!Error::internal("boom").is_fatal());
    }
}
