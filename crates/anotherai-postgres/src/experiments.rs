//! Experiment composition: inputs × versions, their outputs, and the
//! idempotency rules around them.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_postgres::Row;
use uuid::Uuid;

use anotherai::domain::{
    AgentOutput, Experiment, ExperimentInput, ExperimentOutput, ExperimentVersion,
};
use anotherai::error::{Error, Result};

use crate::{db_error, from_naive, to_naive, TenantScopedStore};

/// The identity of one registered experiment completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionIdTuple {
    pub completion_id: Uuid,
    pub version_id: String,
    pub input_id: String,
}

fn experiment_from_row(row: &Row) -> Result<Experiment> {
    let metadata: Option<BTreeMap<String, Value>> = row
        .get::<_, Option<Value>>("metadata")
        .map(serde_json::from_value)
        .transpose()?;
    let use_cache = row
        .get::<_, Option<String>>("use_cache")
        .map(|s| serde_json::from_value(Value::String(s)))
        .transpose()?;
    Ok(Experiment {
        id: row.get("id"),
        created_at: from_naive(row.get("created_at")),
        updated_at: from_naive(row.get("updated_at")),
        author_name: row.get("author_name"),
        title: row.get("title"),
        description: row.get("description"),
        result: row.get("result"),
        agent_id: row.get("agent_id"),
        use_cache,
        annotations: vec![],
        metadata,
        versions: None,
        inputs: None,
        outputs: None,
    })
}

fn output_from_row(row: &Row) -> Result<ExperimentOutput> {
    let output: Option<AgentOutput> = row
        .get::<_, Option<Value>>("output")
        .map(serde_json::from_value)
        .transpose()?;
    Ok(ExperimentOutput {
        completion_id: row.get("completion_id"),
        version_id: row.get("version_id"),
        version_alias: row.get("version_alias"),
        input_id: row.get("input_id"),
        input_alias: row.get("input_alias"),
        created_at: from_naive(row.get("created_at")),
        started_at: row
            .get::<_, Option<chrono::NaiveDateTime>>("started_at")
            .map(from_naive),
        completed_at: row
            .get::<_, Option<chrono::NaiveDateTime>>("completed_at")
            .map(from_naive),
        output,
        cost_usd: row.get("cost_usd"),
        duration_seconds: row.get("duration_seconds"),
        reasoning_token_count: None,
    })
}

impl TenantScopedStore {
    pub async fn create_experiment(&self, experiment: &Experiment) -> Result<()> {
        let metadata_json = experiment
            .metadata
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let use_cache = experiment
            .use_cache
            .map(|c| serde_json::to_value(c))
            .transpose()?
            .and_then(|v| v.as_str().map(str::to_string));
        let conn = self.acquire().await?;
        let result = conn
            .execute(
                "INSERT INTO experiments (id, agent_id, author_name, title, description, use_cache, metadata)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
                &[
                    &experiment.id,
                    &experiment.agent_id,
                    &experiment.author_name,
                    &experiment.title,
                    &experiment.description,
                    &use_cache,
                    &metadata_json,
                ],
            )
            .await
            .map_err(db_error);
        conn.release().await;
        result.map(|_| ())
    }

    pub async fn get_experiment(
        &self,
        experiment_id: &str,
        include_collections: bool,
    ) -> Result<Experiment> {
        let conn = self.acquire().await?;
        let result = async {
            let row = conn
                .query_opt("SELECT * FROM experiments WHERE id = $1", &[&experiment_id])
                .await
                .map_err(db_error)?;
            let Some(row) = row else {
                return Err(Error::ObjectNotFound {
                    object_type: "experiment",
                });
            };
            let mut experiment = experiment_from_row(&row)?;

            if include_collections {
                let input_rows = conn
                    .query(
                        "SELECT payload, alias FROM experiment_inputs
                         WHERE experiment_id = $1 ORDER BY position, created_at",
                        &[&experiment_id],
                    )
                    .await
                    .map_err(db_error)?;
                let mut inputs = Vec::with_capacity(input_rows.len());
                for row in &input_rows {
                    let mut input: ExperimentInput =
                        serde_json::from_value(row.get::<_, Value>("payload"))?;
                    input.alias = row.get("alias");
                    inputs.push(input);
                }
                experiment.inputs = Some(inputs);

                let version_rows = conn
                    .query(
                        "SELECT payload, alias FROM experiment_versions
                         WHERE experiment_id = $1 ORDER BY position, created_at",
                        &[&experiment_id],
                    )
                    .await
                    .map_err(db_error)?;
                let mut versions = Vec::with_capacity(version_rows.len());
                for row in &version_rows {
                    let mut version: ExperimentVersion =
                        serde_json::from_value(row.get::<_, Value>("payload"))?;
                    version.alias = row.get("alias");
                    versions.push(version);
                }
                experiment.versions = Some(versions);

                let output_rows = conn
                    .query(
                        "SELECT * FROM experiment_outputs
                         WHERE experiment_id = $1 ORDER BY created_at",
                        &[&experiment_id],
                    )
                    .await
                    .map_err(db_error)?;
                experiment.outputs = Some(
                    output_rows
                        .iter()
                        .map(output_from_row)
                        .collect::<Result<Vec<_>>>()?,
                );
            }
            Ok(experiment)
        }
        .await;
        conn.release().await;
        result
    }

    pub async fn set_experiment_result(&self, experiment_id: &str, result: &str) -> Result<()> {
        let conn = self.acquire().await?;
        let outcome = conn
            .execute(
                "UPDATE experiments SET result = $2, updated_at = NOW() WHERE id = $1",
                &[&experiment_id, &result],
            )
            .await
            .map_err(db_error);
        conn.release().await;
        if outcome? == 0 {
            return Err(Error::ObjectNotFound {
                object_type: "experiment",
            });
        }
        Ok(())
    }

    pub async fn delete_experiment(&self, experiment_id: &str) -> Result<()> {
        let conn = self.acquire().await?;
        let result = async {
            for table in [
                "experiment_outputs",
                "experiment_inputs",
                "experiment_versions",
            ] {
                conn.execute(
                    format!("DELETE FROM {table} WHERE experiment_id = $1").as_str(),
                    &[&experiment_id],
                )
                .await
                .map_err(db_error)?;
            }
            let deleted = conn
                .execute("DELETE FROM experiments WHERE id = $1", &[&experiment_id])
                .await
                .map_err(db_error)?;
            if deleted == 0 {
                return Err(Error::ObjectNotFound {
                    object_type: "experiment",
                });
            }
            Ok(())
        }
        .await;
        conn.release().await;
        result
    }

    pub async fn list_experiments(
        &self,
        agent_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Experiment>> {
        let since = since.map(to_naive);
        let conn = self.acquire().await?;
        let result = conn
            .query(
                "SELECT * FROM experiments
                 WHERE ($1::varchar IS NULL OR agent_id = $1)
                   AND ($2::timestamp IS NULL OR created_at >= $2)
                 ORDER BY created_at DESC
                 LIMIT $3 OFFSET $4",
                &[&agent_id, &since, &limit, &offset],
            )
            .await
            .map_err(db_error);
        conn.release().await;
        result?.iter().map(experiment_from_row).collect()
    }

    /// Add inputs; duplicates are silently ignored. Returns the ids that
    /// were actually inserted, which makes composition idempotent.
    pub async fn add_experiment_inputs(
        &self,
        experiment_id: &str,
        inputs: &[ExperimentInput],
    ) -> Result<HashSet<String>> {
        let conn = self.acquire().await?;
        let result = async {
            let mut inserted = HashSet::new();
            for (position, input) in inputs.iter().enumerate() {
                let payload = serde_json::to_value(input)?;
                let count = conn
                    .execute(
                        "INSERT INTO experiment_inputs (experiment_id, input_id, alias, payload, position)
                         VALUES ($1, $2, $3, $4, $5)
                         ON CONFLICT (tenant_uid, experiment_id, input_id) DO NOTHING",
                        &[
                            &experiment_id,
                            &input.input.id,
                            &input.alias,
                            &payload,
                            &(position as i32),
                        ],
                    )
                    .await
                    .map_err(db_error)?;
                if count == 1 {
                    inserted.insert(input.input.id.clone());
                }
            }
            Ok(inserted)
        }
        .await;
        conn.release().await;
        result
    }

    /// Add versions; same idempotent contract as inputs.
    pub async fn add_experiment_versions(
        &self,
        experiment_id: &str,
        versions: &[ExperimentVersion],
    ) -> Result<HashSet<String>> {
        let conn = self.acquire().await?;
        let result = async {
            let mut inserted = HashSet::new();
            for (position, version) in versions.iter().enumerate() {
                let payload = serde_json::to_value(version)?;
                let count = conn
                    .execute(
                        "INSERT INTO experiment_versions (experiment_id, version_id, alias, payload, position)
                         VALUES ($1, $2, $3, $4, $5)
                         ON CONFLICT (tenant_uid, experiment_id, version_id) DO NOTHING",
                        &[
                            &experiment_id,
                            &version.version.id,
                            &version.alias,
                            &payload,
                            &(position as i32),
                        ],
                    )
                    .await
                    .map_err(db_error)?;
                if count == 1 {
                    inserted.insert(version.version.id.clone());
                }
            }
            Ok(inserted)
        }
        .await;
        conn.release().await;
        result
    }

    /// Register completions for `(input, version)` cells. A duplicate
    /// completion id is skipped; a *different* completion on an occupied
    /// cell is a `duplicate_value`.
    pub async fn add_experiment_completions(
        &self,
        experiment_id: &str,
        completions: &[CompletionIdTuple],
    ) -> Result<HashSet<Uuid>> {
        let conn = self.acquire().await?;
        let result = async {
            let mut inserted = HashSet::new();
            for completion in completions {
                let count = conn
                    .execute(
                        "INSERT INTO experiment_outputs (experiment_id, completion_id, input_id, version_id)
                         VALUES ($1, $2, $3, $4)
                         ON CONFLICT (tenant_uid, experiment_id, completion_id) DO NOTHING",
                        &[
                            &experiment_id,
                            &completion.completion_id,
                            &completion.input_id,
                            &completion.version_id,
                        ],
                    )
                    .await
                    .map_err(|e| match e.code() {
                        Some(code) if *code == tokio_postgres::error::SqlState::UNIQUE_VIOLATION => {
                            Error::DuplicateValue(format!(
                                "experiment {experiment_id} already has an output for input {} and version {}",
                                completion.input_id, completion.version_id,
                            ))
                        }
                        _ => db_error(e),
                    })?;
                if count == 1 {
                    inserted.insert(completion.completion_id);
                }
            }
            Ok(inserted)
        }
        .await;
        conn.release().await;
        result
    }

    /// Flip a registered completion to in-flight. Reinvocation raises
    /// `duplicate_value`.
    pub async fn start_experiment_completion(
        &self,
        experiment_id: &str,
        completion_id: Uuid,
    ) -> Result<()> {
        let conn = self.acquire().await?;
        let result = async {
            let updated = conn
                .execute(
                    "UPDATE experiment_outputs SET started_at = NOW()
                     WHERE experiment_id = $1 AND completion_id = $2 AND started_at IS NULL",
                    &[&experiment_id, &completion_id],
                )
                .await
                .map_err(db_error)?;
            if updated == 1 {
                return Ok(());
            }
            let exists = conn
                .query_opt(
                    "SELECT 1 FROM experiment_outputs WHERE experiment_id = $1 AND completion_id = $2",
                    &[&experiment_id, &completion_id],
                )
                .await
                .map_err(db_error)?;
            match exists {
                Some(_) => Err(Error::DuplicateValue(format!(
                    "completion {completion_id} already started in experiment {experiment_id}"
                ))),
                None => Err(Error::ObjectNotFound {
                    object_type: "experiment_completion",
                }),
            }
        }
        .await;
        conn.release().await;
        result
    }

    /// Set the terminal output for a registered completion. A second call
    /// on the same pair raises `duplicate_value`.
    pub async fn add_experiment_completion_output(
        &self,
        experiment_id: &str,
        completion_id: Uuid,
        output: &AgentOutput,
        cost_usd: Option<f64>,
        duration_seconds: Option<f64>,
    ) -> Result<()> {
        let output_json = serde_json::to_value(output)?;
        let conn = self.acquire().await?;
        let result = async {
            let updated = conn
                .execute(
                    "UPDATE experiment_outputs SET
                        output = $3, cost_usd = $4, duration_seconds = $5, completed_at = NOW()
                     WHERE experiment_id = $1 AND completion_id = $2 AND completed_at IS NULL",
                    &[
                        &experiment_id,
                        &completion_id,
                        &output_json,
                        &cost_usd,
                        &duration_seconds,
                    ],
                )
                .await
                .map_err(db_error)?;
            if updated == 1 {
                return Ok(());
            }
            let exists = conn
                .query_opt(
                    "SELECT 1 FROM experiment_outputs WHERE experiment_id = $1 AND completion_id = $2",
                    &[&experiment_id, &completion_id],
                )
                .await
                .map_err(db_error)?;
            match exists {
                Some(_) => Err(Error::DuplicateValue(format!(
                    "completion {completion_id} already completed in experiment {experiment_id}"
                ))),
                None => Err(Error::ObjectNotFound {
                    object_type: "experiment_completion",
                }),
            }
        }
        .await;
        conn.release().await;
        result
    }
}
