//! Per-tenant read-only users.
//!
//! Arbitrary user SQL runs on `readonly_<uid>`, a user created lazily with
//! a deterministic password derived from a server-side salt, granted
//! SELECT on the fact tables behind a row policy. Whatever the SQL says,
//! it cannot see another tenant's rows.

use serde_json::Value;
use tracing::info;

use anotherai::error::{Error, Result};
use anotherai::utils::hash::hash_string;

use crate::migrations::ch_error;
use crate::TenantAnalyticsStore;

const READONLY_TABLES: [&str; 4] = ["completions", "annotations", "experiments", "inputs"];

/// `readonly_<uid>`, the per-tenant user name.
pub fn build_tenant_user(tenant_uid: i64) -> String {
    format!("readonly_{tenant_uid}")
}

/// Deterministic password for the per-tenant user. The leading characters
/// satisfy ClickHouse password complexity rules.
pub fn build_tenant_user_password(salt: &str, tenant_uid: i64) -> String {
    format!("Aa0!{}", hash_string(&format!("{salt}-{tenant_uid}")))
}

impl TenantAnalyticsStore {
    /// Run tenant-authored SQL through the read-only user and return the
    /// result rows as JSON objects.
    pub async fn raw_query(&self, sql: &str) -> Result<Vec<Value>> {
        let user = build_tenant_user(self.tenant_uid());
        let password =
            build_tenant_user_password(self.store.password_salt(), self.tenant_uid());
        let client = self.store.readonly_client(&user, &password);

        match fetch_json_rows(&client, sql).await {
            Ok(rows) => Ok(rows),
            // 516: the user does not exist yet. Create it and retry once.
            Err(e) if is_auth_error(&e) => {
                self.ensure_readonly_user(&user, &password).await?;
                fetch_json_rows(&client, sql).await
            }
            Err(e) => Err(e),
        }
    }

    /// Create the read-only user and (re)apply its grants and row policy.
    pub async fn ensure_readonly_user(&self, user: &str, password: &str) -> Result<()> {
        let admin = self.store.client();
        let database = self.store.database();
        let tenant_uid = self.tenant_uid();
        info!(tenant_uid, user, "creating read-only clickhouse user");

        admin
            .query(&format!(
                "CREATE USER IF NOT EXISTS {user} IDENTIFIED BY '{password}'"
            ))
            .execute()
            .await
            .map_err(ch_error)?;
        for table in READONLY_TABLES {
            admin
                .query(&format!(
                    "CREATE ROW POLICY OR REPLACE tenant_{tenant_uid}_{table}_readonly \
                     ON {database}.{table} USING tenant_uid = {tenant_uid} TO {user}"
                ))
                .execute()
                .await
                .map_err(ch_error)?;
            admin
                .query(&format!("GRANT SELECT ON {database}.{table} TO {user}"))
                .execute()
                .await
                .map_err(ch_error)?;
        }
        Ok(())
    }
}

fn is_auth_error(e: &Error) -> bool {
    let message = e.to_string();
    message.contains("Code: 516") || message.contains("AUTHENTICATION_FAILED")
}

async fn fetch_json_rows(client: &clickhouse::Client, sql: &str) -> Result<Vec<Value>> {
    let mut cursor = client
        .query(sql)
        .fetch_bytes("JSONEachRow")
        .map_err(ch_error)?;
    let mut buffer = Vec::new();
    loop {
        match cursor.next().await {
            Ok(Some(chunk)) => buffer.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => return Err(ch_error(e)),
        }
    }
    let text = String::from_utf8(buffer)
        .map_err(|_| Error::internal("clickhouse returned non-utf8 data"))?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| Error::internal(format!("unexpected query result row: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_and_password_are_deterministic() {
        assert_eq!(build_tenant_user(42), "readonly_42");
        let a = build_tenant_user_password("salt", 42);
        let b = build_tenant_user_password("salt", 42);
        assert_eq!(a, b);
        assert!(a.starts_with("Aa0!"));
        // Different tenants, different passwords.
        assert_ne!(a, build_tenant_user_password("salt", 43));
        // Different salts, different passwords.
        assert_ne!(a, build_tenant_user_password("other", 42));
    }
}
