//! Ordered, idempotent schema migrations.
//!
//! Migration files are embedded at compile time and keyed by stem. A
//! single-row lock in the `migrations` meta table serializes concurrent
//! migrators; a recorded id that disagrees with the files on disk aborts
//! the run.

use tokio_postgres::Client;
use tracing::info;

use anotherai::error::{Error, Result};

/// One embedded migration.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub id: &'static str,
    pub sql: &'static str,
}

/// All migrations, ordered by stem.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        id: "0001_init",
        sql: include_str!("migrations/0001_init.sql"),
    },
    Migration {
        id: "0002_views",
        sql: include_str!("migrations/0002_views.sql"),
    },
    Migration {
        id: "0003_deployments",
        sql: include_str!("migrations/0003_deployments.sql"),
    },
    Migration {
        id: "0004_experiments",
        sql: include_str!("migrations/0004_experiments.sql"),
    },
    Migration {
        id: "0005_credit_debits",
        sql: include_str!("migrations/0005_credit_debits.sql"),
    },
];

/// Migrations still to apply after `last_migration_id`. Errors when the
/// recorded id is unknown or the list is not strictly ordered.
pub fn pending_migrations(last_migration_id: &str) -> Result<&'static [Migration]> {
    for window in MIGRATIONS.windows(2) {
        if window[0].id >= window[1].id {
            return Err(Error::fatal(format!(
                "migration files out of order: {} >= {}",
                window[0].id, window[1].id
            )));
        }
    }
    if last_migration_id.is_empty() {
        return Ok(MIGRATIONS);
    }
    match MIGRATIONS.iter().position(|m| m.id == last_migration_id) {
        Some(index) => Ok(&MIGRATIONS[index + 1..]),
        None => Err(Error::fatal(format!(
            "migration discrepancy: recorded id {last_migration_id} not found in migration files"
        ))),
    }
}

async fn acquire_lock(client: &Client) -> Result<String> {
    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS migrations (
                id SERIAL PRIMARY KEY,
                locked BOOLEAN NOT NULL DEFAULT FALSE,
                last_migration_id VARCHAR(64) NOT NULL DEFAULT ''
            )",
        )
        .await
        .map_err(db_error)?;

    let row = client
        .query_opt(
            "INSERT INTO migrations (id, locked, last_migration_id)
             VALUES (1, TRUE, '')
             ON CONFLICT (id) DO UPDATE SET locked = TRUE
             WHERE migrations.locked = FALSE
             RETURNING last_migration_id",
            &[],
        )
        .await
        .map_err(db_error)?;

    match row {
        Some(row) => Ok(row.get(0)),
        None => Err(Error::fatal(
            "failed to acquire migration lock: another migration is running",
        )),
    }
}

async fn release_lock(client: &Client, last_migration_id: &str) -> Result<()> {
    client
        .execute(
            "UPDATE migrations SET locked = FALSE, last_migration_id = $1 WHERE id = 1",
            &[&last_migration_id],
        )
        .await
        .map_err(db_error)?;
    Ok(())
}

/// Apply all pending migrations. Safe to re-run: an already migrated
/// database is a no-op.
pub async fn migrate(client: &Client) -> Result<()> {
    let last = acquire_lock(client).await?;
    let pending = match pending_migrations(&last) {
        Ok(pending) => pending,
        Err(e) => {
            release_lock(client, &last).await?;
            return Err(e);
        }
    };

    let mut applied = last;
    for migration in pending {
        info!(migration = migration.id, "applying migration");
        if let Err(e) = client.batch_execute(migration.sql).await {
            release_lock(client, &applied).await?;
            return Err(Error::fatal(format!(
                "migration {} failed: {e}",
                migration.id
            )));
        }
        applied = migration.id.to_string();
    }
    release_lock(client, &applied).await
}

pub(crate) fn db_error(e: tokio_postgres::Error) -> Error {
    Error::internal(format!("postgres error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_migrations_pending_on_fresh_database() {
        let pending = pending_migrations("").unwrap();
        assert_eq!(pending.len(), MIGRATIONS.len());
    }

    #[test]
    fn recorded_prefix_skips_applied_migrations() {
        let pending = pending_migrations("0002_views").unwrap();
        assert_eq!(pending[0].id, "0003_deployments");

        let pending = pending_migrations(MIGRATIONS[MIGRATIONS.len() - 1].id).unwrap();
        assert!(pending.is_empty());
    }

    #[test]
    fn unknown_recorded_id_is_a_discrepancy() {
        let err = pending_migrations("0042_from_the_future").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn migration_ids_are_strictly_ordered_and_unique() {
        for window in MIGRATIONS.windows(2) {
            assert!(window[0].id < window[1].id);
        }
    }
}
