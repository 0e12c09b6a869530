//! Annotations: ratings and comments on completions and experiments.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What an annotation points at. At least one of the fields is set;
/// `key_path` narrows the target to a field inside an experiment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnnotationTarget {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
}

/// Ambient context the annotation was made in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AnnotationContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
}

/// A named metric value attached to an annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: MetricValue,
}

/// Metric values are floats, strings or booleans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Float(f64),
    Str(String),
}

/// A rating or comment. Created and deleted explicitly, never mutated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    pub author_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<AnnotationTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<AnnotationContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl Annotation {
    /// Set the context agent id, creating the context when absent.
    pub fn set_context_agent_id(&mut self, agent_id: impl Into<String>) {
        self.context
            .get_or_insert_with(AnnotationContext::default)
            .agent_id = Some(agent_id.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_values_deserialize_untagged() {
        let m: Metric = serde_json::from_str(r#"{"name": "score", "value": 0.8}"#).unwrap();
        assert_eq!(m.value, MetricValue::Float(0.8));
        let m: Metric = serde_json::from_str(r#"{"name": "ok", "value": true}"#).unwrap();
        assert_eq!(m.value, MetricValue::Bool(true));
        let m: Metric = serde_json::from_str(r#"{"name": "label", "value": "good"}"#).unwrap();
        assert_eq!(m.value, MetricValue::Str("good".into()));
    }
}
