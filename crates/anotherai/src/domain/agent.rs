//! Agents and API keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named prompt role within a tenant. `(tenant_uid, id)` is unique; `uid`
/// is a random 32-bit integer assigned once at creation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Agent {
    /// Slug, unique within the tenant.
    pub id: String,
    pub uid: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Random 32-bit uid for a new agent.
    pub fn new_uid() -> u32 {
        rand::random()
    }
}

/// Metadata of an API key. The secret itself is only held by
/// [`CompleteApiKey`] at creation time and stored hashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    /// Display form: prefix plus the first four characters of the secret.
    pub partial_key: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_by: String,
}

/// An API key together with its clear-text secret, returned exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteApiKey {
    #[serde(flatten)]
    pub key: ApiKey,
    pub api_key: String,
}

/// Prefix identifying API-key bearer tokens.
pub const API_KEY_PREFIX: &str = "aai-";

/// Generate a fresh API key secret and its display form.
pub fn generate_api_key() -> (String, String) {
    use rand::Rng as _;
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let secret: String = (0..40)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    let full = format!("{API_KEY_PREFIX}{secret}");
    let partial = format!("{API_KEY_PREFIX}{}****", &secret[..4]);
    (full, partial)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_prefix_and_partial() {
        let (full, partial) = generate_api_key();
        assert!(full.starts_with(API_KEY_PREFIX));
        assert_eq!(full.len(), API_KEY_PREFIX.len() + 40);
        assert!(partial.starts_with(API_KEY_PREFIX));
        assert!(partial.ends_with("****"));
        assert!(full.starts_with(&partial[..API_KEY_PREFIX.len() + 4]));
    }
}
