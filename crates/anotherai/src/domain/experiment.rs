//! Experiments: labeled N×M matrices of inputs × versions with outputs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::agent_io::{AgentInput, AgentOutput};
use crate::domain::annotation::Annotation;
use crate::domain::options::CacheUsage;
use crate::domain::version::Version;

/// A version participating in an experiment, with its user-facing alias.
/// Aliases are stable labels distinct from the content-hashed id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentVersion {
    #[serde(flatten)]
    pub version: Version,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// An input participating in an experiment, with its user-facing alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentInput {
    #[serde(flatten)]
    pub input: AgentInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// One cell of the matrix: an input × version pair linked to a completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentOutput {
    pub completion_id: Uuid,
    pub version_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_alias: Option<String>,
    pub input_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_alias: Option<String>,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<AgentOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_token_count: Option<f64>,
}

/// A named collection of inputs × versions and their outputs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    pub author_name: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_cache: Option<CacheUsage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<ExperimentVersion>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<ExperimentInput>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<ExperimentOutput>>,
}

impl Experiment {
    /// Ordered completion ids of the experiment outputs. This is the flat
    /// list the analytical store keeps on the experiment fact row.
    pub fn run_ids(&self) -> Vec<Uuid> {
        self.outputs
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|o| o.completion_id)
            .collect()
    }
}
