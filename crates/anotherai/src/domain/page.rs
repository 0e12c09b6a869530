//! Cursor-paginated result pages.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: Option<u64>, next_page_token: Option<String>) -> Self {
        Page {
            items,
            total,
            next_page_token,
        }
    }
}

/// Encode a listing cursor: base64 of the RFC3339 timestamp of the last
/// item.
pub fn page_token_from_datetime(dt: DateTime<Utc>) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(dt.to_rfc3339())
}

/// Decode a listing cursor back to a timestamp.
pub fn page_token_to_datetime(token: &str) -> Result<DateTime<Utc>> {
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| Error::BadRequest(format!("invalid page token: {token}")))?;
    let s = String::from_utf8(bytes)
        .map_err(|_| Error::BadRequest(format!("invalid page token: {token}")))?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::BadRequest(format!("invalid page token: {token}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_tokens_round_trip() {
        let now = Utc::now();
        let token = page_token_from_datetime(now);
        let back = page_token_to_datetime(&token).unwrap();
        assert_eq!(back.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        assert!(page_token_to_datetime("not a token !").is_err());
    }
}
