//! Tenant-isolated relational store backed by PostgreSQL.
//!
//! Tenant-owned tables default their `tenant_uid` from the session
//! variable `app.tenant_uid` and carry a row policy on the same
//! expression, so a connection can only ever see its tenant's rows. The
//! variable is set on every checkout and cleared on release.

pub mod migrations;

mod agents;
mod deployments;
mod experiments;
mod tenants;
mod views;

pub use experiments::CompletionIdTuple;

use std::ops::Deref;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::error::SqlState;
use tokio_postgres::NoTls;

use anotherai::error::{Error, Result};

pub(crate) fn db_error(e: tokio_postgres::Error) -> Error {
    if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        return Error::DuplicateValue(format!("value already exists: {e}"));
    }
    Error::internal(format!("postgres error: {e}"))
}

pub(crate) fn is_unique_violation(e: &Error) -> bool {
    matches!(e, Error::DuplicateValue(_))
}

pub(crate) fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
    dt.naive_utc()
}

pub(crate) fn from_naive(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(naive, Utc)
}

/// The process-wide store: one bounded pool shared by every tenant.
#[derive(Clone)]
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Connect a pool to `dsn` (a `postgres://` url).
    pub async fn connect(dsn: &str) -> Result<Self> {
        let config = tokio_postgres::Config::from_str(dsn)
            .map_err(|e| Error::fatal(format!("invalid POSTGRES_DSN: {e}")))?;
        let manager = Manager::from_config(
            config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(16)
            .build()
            .map_err(|e| Error::fatal(format!("failed to build postgres pool: {e}")))?;
        Ok(PostgresStore { pool })
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        let client = self.pool.get().await.map_err(pool_error)?;
        migrations::migrate(client.deref().deref()).await
    }

    /// A handle scoped to one tenant. Cheap; connections are checked out
    /// per operation.
    pub fn for_tenant(&self, tenant_uid: i64) -> TenantScopedStore {
        TenantScopedStore {
            pool: self.pool.clone(),
            tenant_uid,
        }
    }

    pub(crate) async fn client(&self) -> Result<Object> {
        self.pool.get().await.map_err(pool_error)
    }
}

fn pool_error(e: deadpool_postgres::PoolError) -> Error {
    Error::internal(format!("postgres pool error: {e}"))
}

/// Store handle bound to one tenant. Every checkout sets the tenant
/// context before the first query.
#[derive(Clone)]
pub struct TenantScopedStore {
    pool: Pool,
    tenant_uid: i64,
}

impl TenantScopedStore {
    pub fn tenant_uid(&self) -> i64 {
        self.tenant_uid
    }

    /// Check out a connection with the tenant context applied.
    pub(crate) async fn acquire(&self) -> Result<TenantConnection> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client
            .execute(
                "SELECT set_config('app.tenant_uid', $1, false)",
                &[&self.tenant_uid.to_string()],
            )
            .await
            .map_err(db_error)?;
        Ok(TenantConnection { client })
    }
}

/// A checked-out connection carrying a tenant context. Call
/// [`TenantConnection::release`] when done; it clears the context before
/// the connection returns to the pool.
pub struct TenantConnection {
    client: Object,
}

impl TenantConnection {
    /// Clear the tenant context and return the connection to the pool.
    pub async fn release(self) {
        let _ = self
            .client
            .execute("SELECT set_config('app.tenant_uid', '', false)", &[])
            .await;
    }

    /// Read back the session tenant context. Test hook for the
    /// set-on-acquire/clear-on-release contract.
    pub async fn current_tenant_context(&self) -> Result<String> {
        let row = self
            .client
            .query_one("SELECT current_setting('app.tenant_uid', true)", &[])
            .await
            .map_err(db_error)?;
        Ok(row.get::<_, Option<String>>(0).unwrap_or_default())
    }
}

impl Deref for TenantConnection {
    type Target = Object;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
