//! Tenant, user and API-key operations.
//!
//! These run without a tenant context: they are the operations that
//! resolve which tenant a request belongs to in the first place.

use tokio_postgres::Row;
use uuid::Uuid;

use anotherai::domain::{generate_api_key, ApiKey, CompleteApiKey, PaymentFailure, Tenant};
use anotherai::error::{Error, Result};
use anotherai::utils::hash::secure_hash;
use anotherai::utils::uuid7;

use crate::{db_error, from_naive, to_naive, PostgresStore};

fn tenant_from_row(row: &Row) -> Tenant {
    let payment_failure = match (
        row.get::<_, Option<String>>("payment_failure_code"),
        row.get::<_, Option<String>>("payment_failure_reason"),
        row.get::<_, Option<chrono::NaiveDateTime>>("payment_failed_at"),
    ) {
        (Some(code), reason, failed_at) => Some(PaymentFailure {
            failure_code: code,
            failure_reason: reason.unwrap_or_default(),
            failed_at: failed_at.map(from_naive).unwrap_or_default(),
        }),
        _ => None,
    };
    Tenant {
        uid: row.get("uid"),
        slug: row.get("slug"),
        org_id: row.get("org_id"),
        owner_id: row.get("owner_id"),
        current_credits_usd: row.get("current_credits_usd"),
        customer_id: row.get("customer_id"),
        payment_failure,
        automatic_payment: row.get("automatic_payment"),
    }
}

fn api_key_from_row(row: &Row) -> ApiKey {
    ApiKey {
        id: row.get("id"),
        name: row.get("name"),
        partial_key: row.get("partial_key"),
        created_at: from_naive(row.get("created_at")),
        last_used_at: row
            .get::<_, Option<chrono::NaiveDateTime>>("last_used_at")
            .map(from_naive),
        created_by: row.get("created_by"),
    }
}

impl PostgresStore {
    pub async fn tenant_by_uid(&self, uid: i64) -> Result<Tenant> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT * FROM tenants WHERE uid = $1", &[&uid])
            .await
            .map_err(db_error)?;
        row.map(|r| tenant_from_row(&r))
            .ok_or(Error::ObjectNotFound {
                object_type: "tenant",
            })
    }

    pub async fn tenant_by_org_id(&self, org_id: &str) -> Result<Tenant> {
        let client = self.client().await?;
        let row = client
            .query_opt("SELECT * FROM tenants WHERE org_id = $1", &[&org_id])
            .await
            .map_err(db_error)?;
        row.map(|r| tenant_from_row(&r))
            .ok_or(Error::ObjectNotFound {
                object_type: "tenant",
            })
    }

    pub async fn tenant_by_owner_id(&self, owner_id: &str) -> Result<Tenant> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT * FROM tenants WHERE owner_id = $1 AND org_id IS NULL",
                &[&owner_id],
            )
            .await
            .map_err(db_error)?;
        row.map(|r| tenant_from_row(&r))
            .ok_or(Error::ObjectNotFound {
                object_type: "tenant",
            })
    }

    /// Resolve a tenant from an API-key secret and stamp its last use.
    pub async fn tenant_by_api_key(&self, api_key: &str) -> Result<Tenant> {
        let hashed = secure_hash(api_key);
        let client = self.client().await?;
        let row = client
            .query_opt(
                "UPDATE api_keys SET last_used_at = NOW() WHERE hashed_key = $1
                 RETURNING tenant_uid",
                &[&hashed],
            )
            .await
            .map_err(db_error)?;
        let Some(row) = row else {
            return Err(Error::InvalidToken("unknown API key".into()));
        };
        self.tenant_by_uid(row.get::<_, i64>(0)).await
    }

    /// Create a tenant, or return the existing one for the same org/owner.
    /// Tenants are created on first authenticated use.
    pub async fn create_tenant(&self, tenant: Tenant) -> Result<Tenant> {
        let uid = if tenant.uid != 0 {
            tenant.uid
        } else {
            i64::from(rand_uid())
        };
        let client = self.client().await?;
        let inserted = client
            .query_opt(
                "INSERT INTO tenants (uid, slug, org_id, owner_id, current_credits_usd, automatic_payment)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (slug) DO NOTHING
                 RETURNING *",
                &[
                    &uid,
                    &tenant.slug,
                    &tenant.org_id,
                    &tenant.owner_id,
                    &tenant.current_credits_usd,
                    &tenant.automatic_payment,
                ],
            )
            .await
            .map_err(db_error)?;
        match inserted {
            Some(row) => Ok(tenant_from_row(&row)),
            None => {
                let row = client
                    .query_one("SELECT * FROM tenants WHERE slug = $1", &[&tenant.slug])
                    .await
                    .map_err(db_error)?;
                Ok(tenant_from_row(&row))
            }
        }
    }

    /// Atomically decrement the credit balance. The row lock serializes
    /// concurrent debits; the returned tenant reflects the new balance.
    pub async fn decrement_credits(&self, tenant_uid: i64, amount_usd: f64) -> Result<Tenant> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "UPDATE tenants SET current_credits_usd = current_credits_usd - $1
                 WHERE uid = $2 RETURNING *",
                &[&amount_usd, &tenant_uid],
            )
            .await
            .map_err(db_error)?;
        row.map(|r| tenant_from_row(&r))
            .ok_or(Error::ObjectNotFound {
                object_type: "tenant",
            })
    }

    /// Record a debit for a completion id. Returns `false` when the id was
    /// already debited, making retries harmless.
    pub async fn debit_once(
        &self,
        tenant_uid: i64,
        completion_id: Uuid,
        amount_usd: f64,
    ) -> Result<bool> {
        let client = self.client().await?;
        let inserted = client
            .execute(
                "INSERT INTO credit_debits (tenant_uid, completion_id, amount_usd)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (completion_id) DO NOTHING",
                &[&tenant_uid, &completion_id, &amount_usd],
            )
            .await
            .map_err(db_error)?;
        Ok(inserted == 1)
    }

    pub async fn set_customer_id(&self, tenant_uid: i64, customer_id: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "UPDATE tenants SET customer_id = $1 WHERE uid = $2",
                &[&customer_id, &tenant_uid],
            )
            .await
            .map_err(db_error)?;
        Ok(())
    }

    pub async fn record_payment_failure(
        &self,
        tenant_uid: i64,
        failure: &PaymentFailure,
    ) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "UPDATE tenants SET payment_failure_code = $1, payment_failure_reason = $2,
                 payment_failed_at = $3 WHERE uid = $4",
                &[
                    &failure.failure_code,
                    &failure.failure_reason,
                    &to_naive(failure.failed_at),
                    &tenant_uid,
                ],
            )
            .await
            .map_err(db_error)?;
        Ok(())
    }

    pub async fn clear_payment_failure(&self, tenant_uid: i64) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "UPDATE tenants SET payment_failure_code = NULL, payment_failure_reason = NULL,
                 payment_failed_at = NULL WHERE uid = $1",
                &[&tenant_uid],
            )
            .await
            .map_err(db_error)?;
        Ok(())
    }

    /// Upsert the organization a user last authenticated against.
    pub async fn set_last_used_organization(
        &self,
        user_id: &str,
        organization_id: Option<&str>,
    ) -> Result<()> {
        let client = self.client().await?;
        let uid: Option<i64> = match organization_id {
            Some(org_id) => client
                .query_opt("SELECT uid FROM tenants WHERE org_id = $1", &[&org_id])
                .await
                .map_err(db_error)?
                .map(|r| r.get(0)),
            None => client
                .query_opt(
                    "SELECT uid FROM tenants WHERE org_id IS NULL AND owner_id = $1",
                    &[&user_id],
                )
                .await
                .map_err(db_error)?
                .map(|r| r.get(0)),
        };
        let Some(uid) = uid else {
            return Err(Error::ObjectNotFound {
                object_type: "tenant",
            });
        };
        client
            .execute(
                "INSERT INTO users (user_id, last_used_organization_uid) VALUES ($1, $2)
                 ON CONFLICT (user_id) DO UPDATE SET last_used_organization_uid = $2",
                &[&user_id, &uid],
            )
            .await
            .map_err(db_error)?;
        Ok(())
    }

    pub async fn last_used_organization(&self, user_id: &str) -> Result<Tenant> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT tenants.* FROM users
                 JOIN tenants ON users.last_used_organization_uid = tenants.uid
                 WHERE users.user_id = $1",
                &[&user_id],
            )
            .await
            .map_err(db_error)?;
        row.map(|r| tenant_from_row(&r))
            .ok_or(Error::ObjectNotFound {
                object_type: "user",
            })
    }

    /// Create an API key; the clear-text secret is returned exactly once.
    pub async fn create_api_key(
        &self,
        tenant_uid: i64,
        name: &str,
        created_by: &str,
    ) -> Result<CompleteApiKey> {
        let (secret, partial) = generate_api_key();
        let id = uuid7::uuid7().to_string();
        let client = self.client().await?;
        let row = client
            .query_one(
                "INSERT INTO api_keys (id, tenant_uid, name, hashed_key, partial_key, created_by)
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
                &[
                    &id,
                    &tenant_uid,
                    &name,
                    &secure_hash(&secret),
                    &partial,
                    &created_by,
                ],
            )
            .await
            .map_err(db_error)?;
        Ok(CompleteApiKey {
            key: api_key_from_row(&row),
            api_key: secret,
        })
    }

    pub async fn list_api_keys(&self, tenant_uid: i64) -> Result<Vec<ApiKey>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT * FROM api_keys WHERE tenant_uid = $1 ORDER BY created_at DESC",
                &[&tenant_uid],
            )
            .await
            .map_err(db_error)?;
        Ok(rows.iter().map(api_key_from_row).collect())
    }

    pub async fn delete_api_key(&self, tenant_uid: i64, id: &str) -> Result<()> {
        let client = self.client().await?;
        let deleted = client
            .execute(
                "DELETE FROM api_keys WHERE tenant_uid = $1 AND id = $2",
                &[&tenant_uid, &id],
            )
            .await
            .map_err(db_error)?;
        if deleted == 0 {
            return Err(Error::ObjectNotFound {
                object_type: "api_key",
            });
        }
        Ok(())
    }
}

fn rand_uid() -> u32 {
    // Zero is reserved as "unset".
    loop {
        let uid = anotherai::domain::Agent::new_uid();
        if uid != 0 {
            return uid;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn random_uid_is_never_zero() {
        for _ in 0..64 {
            assert_ne!(rand_uid(), 0);
        }
    }

    #[test]
    fn datetime_round_trip_is_lossless_at_micros() {
        let now = Utc::now();
        let back = from_naive(to_naive(now));
        assert_eq!(back.timestamp_micros(), now.timestamp_micros());
    }
}
