//! The completion record: one prompt → model → response execution.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::agent::Agent;
use crate::domain::agent_io::{AgentInput, AgentOutput};
use crate::domain::message::Message;
use crate::domain::options::CompletionSource;
use crate::domain::trace::{LlmTrace, Trace};
use crate::domain::version::Version;
use crate::utils::uuid7;

/// Completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    #[default]
    Success,
    Failure,
}

/// One execution record. Immutable after write; `created_at` is the
/// millisecond timestamp embedded in the UUIDv7 id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCompletion {
    pub id: Uuid,
    pub agent: Agent,
    pub agent_input: AgentInput,
    pub agent_output: AgentOutput,
    /// The rendered messages actually sent to the model, excluding the
    /// output messages.
    pub messages: Vec<Message>,
    pub version: Version,
    #[serde(default)]
    pub status: CompletionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub traces: Vec<Trace>,
    #[serde(default)]
    pub from_cache: bool,
    /// Suppresses credit debits for this completion (internal traffic,
    /// health checks).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub preserve_credits: bool,
    #[serde(default)]
    pub source: CompletionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl AgentCompletion {
    /// Creation time derived from the UUIDv7 id.
    pub fn created_at(&self) -> DateTime<Utc> {
        uuid7::generation_time(&self.id)
    }

    /// Model of the last LLM trace, i.e. the model that actually produced
    /// the output after fallback.
    pub fn final_model(&self) -> Option<&str> {
        self.traces.iter().rev().find_map(|t| match t {
            Trace::Llm(LlmTrace { model, .. }) => Some(model.as_str()),
            Trace::Tool(_) => None,
        })
    }
}

/// Metadata keys the runner records on completions.
pub mod metadata_keys {
    /// Providers attempted during the run, in order.
    pub const USED_PROVIDERS: &str = "anotherai.providers";
    /// Concrete model used when the request named an alias.
    pub const USED_MODEL: &str = "anotherai.model";
    /// Wall-clock seconds spent in provider inference.
    pub const INFERENCE_SECONDS: &str = "anotherai.inference_seconds";
    /// Wall-clock seconds spent downloading input files.
    pub const FILE_DOWNLOAD_SECONDS: &str = "anotherai.file_download_seconds";
    /// Deployment alias used to resolve the version, when any.
    pub const DEPLOYMENT_ID: &str = "anotherai.deployment_id";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::Provider;

    fn completion(id: Uuid) -> AgentCompletion {
        AgentCompletion {
            id,
            agent: Agent::default(),
            agent_input: AgentInput::default(),
            agent_output: AgentOutput::default(),
            messages: vec![],
            version: Version::default(),
            status: CompletionStatus::Success,
            duration_seconds: None,
            cost_usd: None,
            traces: vec![],
            from_cache: false,
            preserve_credits: false,
            source: CompletionSource::Api,
            metadata: None,
        }
    }

    #[test]
    fn created_at_is_embedded_in_the_id() {
        let ms = 1_718_000_000_123u64;
        let c = completion(uuid7::uuid7_from_parts(ms, 7));
        assert_eq!(c.created_at().timestamp_millis(), ms as i64);
    }

    #[test]
    fn final_model_skips_tool_traces() {
        let mut c = completion(uuid7::uuid7());
        c.traces = vec![
            Trace::Llm(LlmTrace {
                model: "first".into(),
                provider: Provider::Groq,
                usage: None,
                duration_seconds: 0.1,
                cost_usd: 0.0,
            }),
            Trace::Llm(LlmTrace {
                model: "second".into(),
                provider: Provider::OpenAi,
                usage: None,
                duration_seconds: 0.2,
                cost_usd: 0.0,
            }),
            Trace::Tool(crate::domain::trace::ToolTrace {
                name: "search".into(),
                tool_input_preview: String::new(),
                tool_output_preview: String::new(),
                duration_seconds: 0.0,
                cost_usd: 0.0,
            }),
        ];
        assert_eq!(c.final_model(), Some("second"));
    }
}
