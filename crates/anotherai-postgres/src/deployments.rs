//! Deployment operations: alias → version bindings with archival and
//! cursor pagination.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_postgres::Row;

use anotherai::domain::{Deployment, Version};
use anotherai::error::{Error, Result};

use crate::{db_error, from_naive, to_naive, TenantScopedStore};

fn deployment_from_row(row: &Row) -> Result<Deployment> {
    let version: Version = serde_json::from_value(row.get::<_, Value>("version"))?;
    let metadata: Option<BTreeMap<String, Value>> = row
        .get::<_, Option<Value>>("metadata")
        .map(serde_json::from_value)
        .transpose()?;
    Ok(Deployment {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        version,
        created_by: row.get("created_by"),
        created_at: from_naive(row.get("created_at")),
        updated_at: from_naive(row.get("updated_at")),
        archived_at: row
            .get::<_, Option<chrono::NaiveDateTime>>("archived_at")
            .map(from_naive),
        metadata,
    })
}

impl TenantScopedStore {
    /// Create or update a deployment atomically; the version pointer is
    /// rotated on conflict.
    pub async fn upsert_deployment(&self, deployment: &Deployment) -> Result<Deployment> {
        let version_json = serde_json::to_value(&deployment.version)?;
        let metadata_json = deployment
            .metadata
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let conn = self.acquire().await?;
        let result = conn
            .query_one(
                "INSERT INTO deployments (id, agent_id, version_id, version, created_by, metadata)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 ON CONFLICT (tenant_uid, id) DO UPDATE SET
                    version_id = EXCLUDED.version_id,
                    version = EXCLUDED.version,
                    metadata = COALESCE(EXCLUDED.metadata, deployments.metadata),
                    updated_at = NOW()
                 RETURNING *",
                &[
                    &deployment.id,
                    &deployment.agent_id,
                    &deployment.version.id,
                    &version_json,
                    &deployment.created_by,
                    &metadata_json,
                ],
            )
            .await
            .map_err(db_error);
        conn.release().await;
        deployment_from_row(&result?)
    }

    pub async fn get_deployment(&self, deployment_id: &str) -> Result<Deployment> {
        let conn = self.acquire().await?;
        let result = conn
            .query_opt("SELECT * FROM deployments WHERE id = $1", &[&deployment_id])
            .await
            .map_err(db_error);
        conn.release().await;
        result?
            .map(|r| deployment_from_row(&r))
            .transpose()?
            .ok_or(Error::ObjectNotFound {
                object_type: "deployment",
            })
    }

    /// Archival sets a flag; deployments are never hard-deleted.
    pub async fn archive_deployment(&self, deployment_id: &str) -> Result<()> {
        let conn = self.acquire().await?;
        let result = conn
            .execute(
                "UPDATE deployments SET archived_at = NOW(), updated_at = NOW() WHERE id = $1",
                &[&deployment_id],
            )
            .await
            .map_err(db_error);
        conn.release().await;
        if result? == 0 {
            return Err(Error::ObjectNotFound {
                object_type: "deployment",
            });
        }
        Ok(())
    }

    /// Newest-first listing; `created_before` is the decoded page cursor.
    pub async fn list_deployments(
        &self,
        agent_id: Option<&str>,
        created_before: Option<DateTime<Utc>>,
        include_archived: bool,
        limit: i64,
    ) -> Result<Vec<Deployment>> {
        let cursor = created_before.map(to_naive);
        let conn = self.acquire().await?;
        let result = conn
            .query(
                "SELECT * FROM deployments
                 WHERE ($1::varchar IS NULL OR agent_id = $1)
                   AND ($2::timestamp IS NULL OR created_at < $2)
                   AND ($3 OR archived_at IS NULL)
                 ORDER BY created_at DESC
                 LIMIT $4",
                &[&agent_id, &cursor, &include_archived, &limit],
            )
            .await
            .map_err(db_error);
        conn.release().await;
        result?.iter().map(deployment_from_row).collect()
    }

    pub async fn count_deployments(
        &self,
        agent_id: Option<&str>,
        include_archived: bool,
    ) -> Result<u64> {
        let conn = self.acquire().await?;
        let result = conn
            .query_one(
                "SELECT COUNT(*) FROM deployments
                 WHERE ($1::varchar IS NULL OR agent_id = $1)
                   AND ($2 OR archived_at IS NULL)",
                &[&agent_id, &include_archived],
            )
            .await
            .map_err(db_error);
        conn.release().await;
        Ok(result?.get::<_, i64>(0) as u64)
    }
}
