//! Authentication: API keys and JWTs, tenant resolution, credit gate.

use std::num::NonZeroUsize;
use std::sync::Arc;

use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use lru::LruCache;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::warn;

use anotherai::domain::{Tenant, API_KEY_PREFIX};
use anotherai::error::{Error, Result};
use anotherai::events::{Event, EventPayload, EventRouter};
use anotherai_postgres::PostgresStore;

/// Claims the gateway understands.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    /// Organization the token was minted for, when any.
    #[serde(default, alias = "org_id")]
    pub org: Option<String>,
    #[serde(default)]
    pub exp: i64,
}

/// Token signature verification.
#[async_trait::async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Claims>;
}

fn invalid_token(message: impl Into<String>) -> Error {
    Error::InvalidToken(message.into())
}

fn decode_claims(token: &str, key: &DecodingKey) -> Result<Claims> {
    let header = decode_header(token)
        .map_err(|_| invalid_token("token does not have a valid header"))?;
    let validation = Validation::new(header.alg);
    decode::<Claims>(token, key, &validation)
        .map(|data| data.claims)
        .map_err(|_| invalid_token("invalid token signature"))
}

/// Verifies against a JWKS document, fetched lazily and cached by kid.
/// An unknown kid triggers one refetch before failing.
pub struct JwksVerifier {
    url: String,
    client: reqwest::Client,
    keys: Mutex<LruCache<String, Arc<DecodingKey>>>,
}

impl JwksVerifier {
    pub fn new(url: impl Into<String>) -> Self {
        #[allow(clippy::unwrap_used)] // non-zero constant
        let capacity = NonZeroUsize::new(16).unwrap();
        JwksVerifier {
            url: url.into(),
            client: reqwest::Client::new(),
            keys: Mutex::new(LruCache::new(capacity)),
        }
    }

    async fn refresh(&self) -> Result<()> {
        let jwks: JwkSet = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| invalid_token(format!("failed to fetch JWKS: {e}")))?
            .json()
            .await
            .map_err(|e| invalid_token(format!("invalid JWKS document: {e}")))?;
        let mut cache = self.keys.lock().await;
        for jwk in &jwks.keys {
            let Some(kid) = jwk.common.key_id.clone() else {
                continue;
            };
            if let Ok(key) = DecodingKey::from_jwk(jwk) {
                cache.put(kid, Arc::new(key));
            }
        }
        Ok(())
    }

    async fn signing_key(&self, kid: &str) -> Result<Arc<DecodingKey>> {
        if let Some(key) = self.keys.lock().await.get(kid) {
            return Ok(Arc::clone(key));
        }
        self.refresh().await?;
        self.keys
            .lock()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(|| invalid_token("token does not have a known kid"))
    }
}

#[async_trait::async_trait]
impl SignatureVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> Result<Claims> {
        let header = decode_header(token)
            .map_err(|_| invalid_token("token does not have a valid header"))?;
        let kid = header
            .kid
            .ok_or_else(|| invalid_token("token does not have a valid kid"))?;
        let key = self.signing_key(&kid).await?;
        decode_claims(token, &key)
    }
}

/// Verifies against a single inline JWK.
pub struct JwkVerifier {
    key: DecodingKey,
}

impl JwkVerifier {
    pub fn new(jwk_json: &str) -> Result<Self> {
        let jwk: Jwk = serde_json::from_str(jwk_json)
            .map_err(|e| Error::fatal(format!("invalid JWK: {e}")))?;
        let key =
            DecodingKey::from_jwk(&jwk).map_err(|e| Error::fatal(format!("invalid JWK: {e}")))?;
        Ok(JwkVerifier { key })
    }
}

#[async_trait::async_trait]
impl SignatureVerifier for JwkVerifier {
    async fn verify(&self, token: &str) -> Result<Claims> {
        decode_claims(token, &self.key)
    }
}

/// Accepts everything. Local development only.
pub struct NoopVerifier;

#[async_trait::async_trait]
impl SignatureVerifier for NoopVerifier {
    async fn verify(&self, _token: &str) -> Result<Claims> {
        Ok(Claims {
            sub: "local".into(),
            org: None,
            exp: 0,
        })
    }
}

/// Pick the verifier the environment configures.
pub fn default_verifier(
    jwks_url: Option<&str>,
    jwk: Option<&str>,
) -> Result<Arc<dyn SignatureVerifier>> {
    if let Some(url) = jwks_url {
        return Ok(Arc::new(JwksVerifier::new(url)));
    }
    if let Some(jwk) = jwk {
        return Ok(Arc::new(JwkVerifier::new(jwk)?));
    }
    warn!("no signature verifier configured, using noop");
    Ok(Arc::new(NoopVerifier))
}

/// Resolves bearer tokens to tenants and enforces the credit gate.
pub struct SecurityService {
    postgres: PostgresStore,
    verifier: Arc<dyn SignatureVerifier>,
    events: Arc<dyn EventRouter>,
}

impl SecurityService {
    pub fn new(
        postgres: PostgresStore,
        verifier: Arc<dyn SignatureVerifier>,
        events: Arc<dyn EventRouter>,
    ) -> Self {
        SecurityService {
            postgres,
            verifier,
            events,
        }
    }

    /// Strip the bearer scheme from an `Authorization` header value.
    pub fn token_from_header(header: &str) -> Result<&str> {
        let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
        if token.is_empty() {
            return Err(invalid_token(
                "Provide either an API key (aai-***) or a JWT in the Authorization header",
            ));
        }
        Ok(token)
    }

    /// Resolve a token to its tenant, creating the tenant on first
    /// authenticated use for JWT logins.
    pub async fn find_tenant(&self, token: &str) -> Result<Tenant> {
        if token.starts_with(API_KEY_PREFIX) {
            return self.postgres.tenant_by_api_key(token).await;
        }

        let claims = self.verifier.verify(token).await?;
        let tenant = match &claims.org {
            Some(org_id) => match self.postgres.tenant_by_org_id(org_id).await {
                Ok(tenant) => tenant,
                Err(Error::ObjectNotFound { .. }) => {
                    self.postgres
                        .create_tenant(Tenant {
                            slug: format!("org-{org_id}"),
                            org_id: Some(org_id.clone()),
                            ..Default::default()
                        })
                        .await?
                }
                Err(e) => return Err(e),
            },
            None => match self.postgres.tenant_by_owner_id(&claims.sub).await {
                Ok(tenant) => tenant,
                Err(Error::ObjectNotFound { .. }) => {
                    self.postgres
                        .create_tenant(Tenant {
                            slug: format!("user-{}", claims.sub),
                            owner_id: Some(claims.sub.clone()),
                            ..Default::default()
                        })
                        .await?
                }
                Err(e) => return Err(e),
            },
        };

        self.events.send(Event::new(
            tenant.uid,
            EventPayload::UserConnected {
                user_id: claims.sub,
                organization_id: claims.org,
            },
        ));
        Ok(tenant)
    }

    /// Reject billable requests for tenants out of credits with a
    /// recorded payment failure.
    pub fn ensure_credits(tenant: &Tenant) -> Result<()> {
        if tenant.credits_exhausted() {
            return Err(Error::PaymentRequired(format!(
                "credits exhausted (balance: {:.4} USD); update the payment method to continue",
                tenant.current_credits_usd
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_scheme_is_stripped() {
        assert_eq!(
            SecurityService::token_from_header("Bearer aai-secret").unwrap(),
            "aai-secret"
        );
        assert_eq!(
            SecurityService::token_from_header("aai-secret").unwrap(),
            "aai-secret"
        );
        assert!(SecurityService::token_from_header("Bearer ").is_err());
    }

    #[test]
    fn credit_gate_rejects_exhausted_tenants() {
        let mut tenant = Tenant {
            current_credits_usd: -1.0,
            ..Default::default()
        };
        assert!(SecurityService::ensure_credits(&tenant).is_ok());
        tenant.payment_failure = Some(anotherai::domain::PaymentFailure {
            failure_code: "card_declined".into(),
            failure_reason: "declined".into(),
            failed_at: chrono::Utc::now(),
        });
        let err = SecurityService::ensure_credits(&tenant).unwrap_err();
        assert_eq!(err.status_code(), 402);
    }

    #[tokio::test]
    async fn noop_verifier_is_local_only_fallback() {
        let claims = NoopVerifier.verify("anything").await.unwrap();
        assert_eq!(claims.sub, "local");
    }
}
