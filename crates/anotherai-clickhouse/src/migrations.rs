//! Ordered migrations for the analytical schema.
//!
//! ClickHouse has no convenient lock primitive, so the engine assumes a
//! single migrator process (the `migrate` binary); a recorded prefix that
//! disagrees with the embedded files still aborts the run.

use clickhouse::Client;
use time::OffsetDateTime;
use tracing::info;

use anotherai::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub id: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
    id: "0001_init",
    sql: include_str!("migrations/0001_init.sql"),
}];

/// Split a migration file into individual commands: ClickHouse executes
/// one statement per request. Comment lines are dropped.
pub fn split_commands(sql: &str) -> Vec<String> {
    let mut commands: Vec<Vec<&str>> = vec![Vec::new()];
    for line in sql.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with("--") {
            continue;
        }
        #[allow(clippy::unwrap_used)] // the vector always has a tail element
        commands.last_mut().unwrap().push(stripped);
        if stripped.ends_with(';') {
            commands.push(Vec::new());
        }
    }
    commands
        .into_iter()
        .filter(|lines| !lines.is_empty())
        .map(|lines| lines.join("\n"))
        .collect()
}

fn pending(existing: &[String]) -> Result<&'static [Migration]> {
    for (index, applied) in existing.iter().enumerate() {
        match MIGRATIONS.get(index) {
            Some(m) if m.id == applied => {}
            _ => {
                return Err(Error::fatal(format!(
                    "migration discrepancy: recorded id {applied} does not match migration files"
                )))
            }
        }
    }
    Ok(&MIGRATIONS[existing.len()..])
}

async fn existing_migrations(client: &Client) -> Result<Vec<String>> {
    client
        .query("SELECT migration_id FROM migrations ORDER BY migration_id ASC")
        .fetch_all::<String>()
        .await
        .map_err(ch_error)
}

/// Apply pending migrations. Idempotent: a fully migrated database is a
/// no-op.
pub async fn migrate(client: &Client) -> Result<()> {
    client
        .query(
            "CREATE TABLE IF NOT EXISTS migrations (
                migration_id String,
                migrated_at DateTime64(3, 'UTC')
            ) ENGINE = MergeTree ORDER BY migration_id",
        )
        .execute()
        .await
        .map_err(ch_error)?;

    let existing = existing_migrations(client).await?;
    for migration in pending(&existing)? {
        info!(migration = migration.id, "applying clickhouse migration");
        for command in split_commands(migration.sql) {
            client.query(&command).execute().await.map_err(|e| {
                Error::fatal(format!("migration {} failed: {e}", migration.id))
            })?;
        }
        // Record synchronously so a crash never leaves an applied-but-
        // unrecorded migration behind a batched insert.
        let mut insert = client
            .insert::<MigrationRow>("migrations")
            .await
            .map_err(ch_error)?;
        insert
            .write(&MigrationRow {
                migration_id: migration.id.to_string(),
                migrated_at: OffsetDateTime::now_utc(),
            })
            .await
            .map_err(ch_error)?;
        insert.end().await.map_err(ch_error)?;
    }
    Ok(())
}

#[derive(Debug, clickhouse::Row, serde::Serialize)]
struct MigrationRow {
    migration_id: String,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    migrated_at: OffsetDateTime,
}

pub(crate) fn ch_error(e: clickhouse::error::Error) -> Error {
    Error::internal(format!("clickhouse error: {e}"))
}
