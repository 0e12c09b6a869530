//! Row types mirroring the analytical tables, with conversions to and
//! from the domain. JSON-shaped payloads travel as String columns.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use anotherai::domain::{
    AgentCompletion, AgentInput, Annotation, CompletionSource, CompletionStatus, Experiment,
    Metric, MetricValue,
};
use anotherai::error::Result;
use anotherai::utils::preview::compute_preview;
use anotherai::utils::uuid7;

pub(crate) fn to_odt(dt: DateTime<Utc>) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(dt.timestamp_micros()) * 1000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

pub(crate) fn from_odt(odt: OffsetDateTime) -> DateTime<Utc> {
    Utc.timestamp_micros((odt.unix_timestamp_nanos() / 1000) as i64)
        .single()
        .unwrap_or_default()
}

/// Metadata values are stringified for the Map(String, String) column.
fn sanitize_metadata(metadata: Option<&BTreeMap<String, Value>>) -> Vec<(String, String)> {
    metadata
        .map(|m| {
            m.iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn metadata_to_domain(metadata: Vec<(String, String)>) -> Option<BTreeMap<String, Value>> {
    if metadata.is_empty() {
        return None;
    }
    Some(
        metadata
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect(),
    )
}

#[derive(Debug, Clone, clickhouse::Row, Serialize, Deserialize)]
pub struct CompletionRow {
    pub tenant_uid: i64,
    #[serde(with = "clickhouse::serde::uuid")]
    pub id: Uuid,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    pub created_at: OffsetDateTime,
    pub agent_id: String,
    pub agent_uid: u32,
    pub version_id: String,
    pub version: String,
    pub input_id: String,
    pub input_preview: String,
    pub output: String,
    pub output_preview: String,
    pub messages: String,
    pub traces: String,
    pub status: String,
    pub source: String,
    pub from_cache: u8,
    pub cost_usd: f64,
    pub duration_seconds: f64,
    pub metadata: Vec<(String, String)>,
}

impl CompletionRow {
    pub fn from_domain(tenant_uid: i64, completion: &AgentCompletion) -> Result<Self> {
        let output_preview = completion
            .agent_output
            .messages
            .first()
            .map(|m| compute_preview(&Value::String(m.text()), 255))
            .unwrap_or_default();
        Ok(CompletionRow {
            tenant_uid,
            id: completion.id,
            created_at: to_odt(completion.created_at()),
            agent_id: completion.agent.id.clone(),
            agent_uid: completion.agent.uid,
            version_id: completion.version.id.clone(),
            version: serde_json::to_string(&completion.version)?,
            input_id: completion.agent_input.id.clone(),
            input_preview: completion.agent_input.preview.clone(),
            output: serde_json::to_string(&completion.agent_output)?,
            output_preview,
            messages: serde_json::to_string(&completion.messages)?,
            traces: serde_json::to_string(&completion.traces)?,
            status: match completion.status {
                CompletionStatus::Success => "success".into(),
                CompletionStatus::Failure => "failure".into(),
            },
            source: match completion.source {
                CompletionSource::Web => "web".into(),
                CompletionSource::Api => "api".into(),
                CompletionSource::Mcp => "mcp".into(),
            },
            from_cache: u8::from(completion.from_cache),
            cost_usd: completion.cost_usd.unwrap_or(0.0),
            duration_seconds: completion.duration_seconds.unwrap_or(0.0),
            metadata: sanitize_metadata(completion.metadata.as_ref()),
        })
    }

    pub fn to_domain(&self) -> Result<AgentCompletion> {
        Ok(AgentCompletion {
            id: self.id,
            agent: anotherai::domain::Agent {
                id: self.agent_id.clone(),
                uid: self.agent_uid,
                name: String::new(),
                created_at: uuid7::generation_time(&self.id),
            },
            agent_input: AgentInput {
                id: self.input_id.clone(),
                preview: self.input_preview.clone(),
                messages: None,
                variables: None,
            },
            agent_output: serde_json::from_str(&self.output)?,
            messages: serde_json::from_str(&self.messages)?,
            version: serde_json::from_str(&self.version)?,
            status: if self.status == "failure" {
                CompletionStatus::Failure
            } else {
                CompletionStatus::Success
            },
            duration_seconds: Some(self.duration_seconds),
            cost_usd: Some(self.cost_usd),
            traces: serde_json::from_str(&self.traces)?,
            from_cache: self.from_cache != 0,
            // Not persisted: the flag only matters to the debit task,
            // which reads the event payload.
            preserve_credits: false,
            source: match self.source.as_str() {
                "web" => CompletionSource::Web,
                "mcp" => CompletionSource::Mcp,
                _ => CompletionSource::Api,
            },
            metadata: metadata_to_domain(self.metadata.clone()),
        })
    }
}

#[derive(Debug, Clone, clickhouse::Row, Serialize, Deserialize)]
pub struct InputRow {
    pub tenant_uid: i64,
    pub input_id: String,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    pub created_at: OffsetDateTime,
    pub agent_id: String,
    pub input_preview: String,
    pub input_messages: String,
    pub input_variables: String,
    pub metadata: Vec<(String, String)>,
}

impl InputRow {
    pub fn from_domain(
        tenant_uid: i64,
        agent_id: &str,
        input: &AgentInput,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(InputRow {
            tenant_uid,
            input_id: input.id.clone(),
            created_at: to_odt(created_at),
            agent_id: agent_id.to_string(),
            input_preview: input.preview.clone(),
            input_messages: input
                .messages
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?
                .unwrap_or_default(),
            input_variables: input
                .variables
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?
                .unwrap_or_default(),
            metadata: Vec::new(),
        })
    }

    pub fn to_domain(&self) -> Result<AgentInput> {
        Ok(AgentInput {
            id: self.input_id.clone(),
            preview: self.input_preview.clone(),
            messages: if self.input_messages.is_empty() {
                None
            } else {
                Some(serde_json::from_str(&self.input_messages)?)
            },
            variables: if self.input_variables.is_empty() {
                None
            } else {
                Some(serde_json::from_str(&self.input_variables)?)
            },
        })
    }
}

#[derive(Debug, Clone, clickhouse::Row, Serialize, Deserialize)]
pub struct AnnotationRow {
    pub tenant_uid: i64,
    pub id: String,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    pub created_at: OffsetDateTime,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    pub updated_at: OffsetDateTime,
    pub agent_id: String,
    #[serde(with = "clickhouse::serde::uuid")]
    pub completion_id: Uuid,
    pub experiment_id: String,
    pub author_name: String,
    pub text: Option<String>,
    pub metric_name: Option<String>,
    pub metric_value_float: Option<f64>,
    pub metric_value_str: Option<String>,
    pub metric_value_bool: Option<u8>,
    pub metadata: Vec<(String, String)>,
}

impl AnnotationRow {
    pub fn from_domain(tenant_uid: i64, annotation: &Annotation) -> Self {
        let mut completion_id = None;
        let mut experiment_id = None;
        let mut agent_id = String::new();
        if let Some(context) = &annotation.context {
            experiment_id = context.experiment_id.clone();
            agent_id = context.agent_id.clone().unwrap_or_default();
        }
        if let Some(target) = &annotation.target {
            // An experiment id in both context and target should not
            // happen; the target wins.
            if target.experiment_id.is_some() {
                experiment_id = target.experiment_id.clone();
            }
            completion_id = target.completion_id;
        }
        let (metric_name, metric_value_float, metric_value_str, metric_value_bool) =
            match &annotation.metric {
                Some(Metric {
                    name,
                    value: MetricValue::Float(f),
                }) => (Some(name.clone()), Some(*f), None, None),
                Some(Metric {
                    name,
                    value: MetricValue::Str(s),
                }) => (Some(name.clone()), None, Some(s.clone()), None),
                Some(Metric {
                    name,
                    value: MetricValue::Bool(b),
                }) => (Some(name.clone()), None, None, Some(u8::from(*b))),
                None => (None, None, None, None),
            };
        AnnotationRow {
            tenant_uid,
            id: annotation.id.clone(),
            created_at: to_odt(annotation.created_at),
            updated_at: to_odt(annotation.updated_at.max(annotation.created_at)),
            agent_id,
            completion_id: completion_id.unwrap_or_else(uuid7::uuid_zero),
            experiment_id: experiment_id.unwrap_or_default(),
            author_name: annotation.author_name.clone(),
            text: annotation.text.clone(),
            metric_name,
            metric_value_float,
            metric_value_str,
            metric_value_bool,
            metadata: annotation
                .metadata
                .as_ref()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
        }
    }

    pub fn to_domain(&self) -> Annotation {
        let metric = match (
            &self.metric_name,
            self.metric_value_float,
            &self.metric_value_str,
            self.metric_value_bool,
        ) {
            (Some(name), Some(f), _, _) => Some(Metric {
                name: name.clone(),
                value: MetricValue::Float(f),
            }),
            (Some(name), _, Some(s), _) => Some(Metric {
                name: name.clone(),
                value: MetricValue::Str(s.clone()),
            }),
            (Some(name), _, _, Some(b)) => Some(Metric {
                name: name.clone(),
                value: MetricValue::Bool(b != 0),
            }),
            _ => None,
        };
        Annotation {
            id: self.id.clone(),
            created_at: from_odt(self.created_at),
            updated_at: from_odt(self.updated_at),
            author_name: self.author_name.clone(),
            target: Some(anotherai::domain::AnnotationTarget {
                completion_id: (!uuid7::is_zero(&self.completion_id)).then_some(self.completion_id),
                experiment_id: (!self.experiment_id.is_empty())
                    .then(|| self.experiment_id.clone()),
                key_path: None,
            }),
            context: (!self.agent_id.is_empty()).then(|| anotherai::domain::AnnotationContext {
                agent_id: Some(self.agent_id.clone()),
                experiment_id: None,
            }),
            text: self.text.clone(),
            metric,
            metadata: (!self.metadata.is_empty())
                .then(|| self.metadata.iter().cloned().collect()),
        }
    }
}

#[derive(Debug, Clone, clickhouse::Row, Serialize, Deserialize)]
pub struct ExperimentRow {
    pub tenant_uid: i64,
    pub id: String,
    #[serde(with = "clickhouse::serde::time::datetime64::millis")]
    pub created_at: OffsetDateTime,
    pub agent_id: String,
    pub title: String,
    pub description: String,
    pub result: Option<String>,
    pub completion_ids: Vec<String>,
    pub metadata: Vec<(String, String)>,
}

impl ExperimentRow {
    pub fn from_domain(tenant_uid: i64, experiment: &Experiment) -> Self {
        ExperimentRow {
            tenant_uid,
            id: experiment.id.clone(),
            created_at: to_odt(experiment.created_at),
            agent_id: experiment.agent_id.clone(),
            title: experiment.title.clone(),
            description: experiment.description.clone(),
            result: experiment.result.clone(),
            completion_ids: experiment
                .run_ids()
                .iter()
                .map(Uuid::to_string)
                .collect(),
            metadata: sanitize_metadata(experiment.metadata.as_ref()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anotherai::domain::{Agent, AgentOutput, Message, Role, Version};

    fn completion() -> AgentCompletion {
        AgentCompletion {
            id: uuid7::uuid7(),
            agent: Agent {
                id: "test-agent".into(),
                uid: 42,
                ..Default::default()
            },
            agent_input: AgentInput {
                messages: Some(vec![Message::with_text(Role::User, "hi")]),
                ..Default::default()
            }
            .normalized(),
            agent_output: AgentOutput {
                messages: vec![Message::with_text(Role::Assistant, "hello")],
                error: None,
            },
            messages: vec![Message::with_text(Role::User, "hi")],
            version: Version {
                model: "gpt-4.1-mini".into(),
                ..Default::default()
            }
            .assign_id(),
            status: CompletionStatus::Success,
            duration_seconds: Some(1.5),
            cost_usd: Some(0.02),
            traces: vec![],
            from_cache: false,
            preserve_credits: false,
            source: CompletionSource::Api,
            metadata: Some(
                [("anotherai.model".to_string(), Value::String("x".into()))]
                    .into_iter()
                    .collect(),
            ),
        }
    }

    #[test]
    fn completion_row_round_trips() {
        let original = completion();
        let row = CompletionRow::from_domain(7, &original).unwrap();
        assert_eq!(row.tenant_uid, 7);
        assert_eq!(row.status, "success");
        let back = row.to_domain().unwrap();
        assert_eq!(back.id, original.id);
        assert_eq!(back.version.id, original.version.id);
        assert_eq!(back.cost_usd, original.cost_usd);
        assert_eq!(back.agent_output, original.agent_output);
        assert_eq!(back.created_at(), original.created_at());
    }

    #[test]
    fn annotation_metric_lands_in_one_typed_column() {
        let annotation = Annotation {
            id: "a1".into(),
            author_name: "reviewer".into(),
            metric: Some(Metric {
                name: "score".into(),
                value: MetricValue::Float(0.9),
            }),
            ..Default::default()
        };
        let row = AnnotationRow::from_domain(7, &annotation);
        assert_eq!(row.metric_value_float, Some(0.9));
        assert_eq!(row.metric_value_str, None);
        assert_eq!(row.metric_value_bool, None);
        let back = row.to_domain();
        assert_eq!(back.metric, annotation.metric);
    }

    #[test]
    fn odt_conversion_keeps_millisecond_precision() {
        let dt = Utc.timestamp_millis_opt(1_718_000_123_456).single().unwrap();
        assert_eq!(from_odt(to_odt(dt)), dt);
    }
}
