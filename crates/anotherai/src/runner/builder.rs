//! Accumulates the state of one run and builds the completion record.

use std::collections::BTreeMap;
use std::time::Instant;

use serde_json::Value;
use uuid::Uuid;

use crate::domain::{
    metadata_keys, Agent, AgentCompletion, AgentInput, AgentOutput, CompletionSource,
    CompletionStatus, Message, Version,
};
use crate::error::ErrorPayload;
use crate::providers::LlmCompletion;
use crate::utils::uuid7;

use super::RunnerOutput;

/// Builder for the single [`AgentCompletion`] a run emits.
#[derive(Debug)]
pub struct CompletionBuilder {
    pub id: Uuid,
    pub agent: Agent,
    pub version: Version,
    pub agent_input: AgentInput,
    /// Rendered messages actually sent to the provider.
    pub messages: Vec<Message>,
    pub source: CompletionSource,
    pub metadata: BTreeMap<String, Value>,
    pub llm_completions: Vec<LlmCompletion>,
    /// Marks the completion as exempt from credit debits.
    pub preserve_credits: bool,
    started: Instant,
}

impl CompletionBuilder {
    pub fn new(
        agent: Agent,
        version: Version,
        agent_input: AgentInput,
        messages: Vec<Message>,
        source: CompletionSource,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        CompletionBuilder {
            id: uuid7::uuid7(),
            agent,
            version,
            agent_input,
            messages,
            source,
            metadata,
            llm_completions: Vec::new(),
            preserve_credits: false,
            started: Instant::now(),
        }
    }

    pub fn add_metadata(&mut self, key: &str, value: Value) {
        self.metadata.insert(key.to_string(), value);
    }

    /// Append to a list-valued metadata key.
    pub fn append_metadata(&mut self, key: &str, value: Value) {
        match self.metadata.get_mut(key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let previous = existing.take();
                self.metadata
                    .insert(key.to_string(), Value::Array(vec![previous, value]));
            }
            None => {
                self.metadata.insert(key.to_string(), Value::Array(vec![value]));
            }
        }
    }

    pub fn add_attempt(&mut self, completion: LlmCompletion) {
        self.append_metadata(
            metadata_keys::USED_PROVIDERS,
            Value::String(completion.provider.as_str().to_string()),
        );
        self.llm_completions.push(completion);
    }

    /// Seconds elapsed since the builder was created.
    pub fn elapsed_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Build the completion. Cost and duration are sums over the recorded
    /// traces; status is `failure` whenever an error is attached.
    pub fn build(mut self, output: RunnerOutput, error: Option<ErrorPayload>) -> AgentCompletion {
        let traces: Vec<_> = self.llm_completions.iter().map(LlmCompletion::to_trace).collect();
        let cost_usd: f64 = traces.iter().map(|t| t.cost_usd()).sum();
        let duration_seconds: f64 = traces.iter().map(|t| t.duration_seconds()).sum();
        self.metadata.insert(
            metadata_keys::INFERENCE_SECONDS.to_string(),
            Value::from(duration_seconds),
        );

        AgentCompletion {
            id: self.id,
            agent: self.agent,
            agent_input: self.agent_input,
            agent_output: AgentOutput {
                messages: output.to_messages(),
                error: error.clone(),
            },
            messages: self.messages,
            version: self.version,
            status: if error.is_some() {
                CompletionStatus::Failure
            } else {
                CompletionStatus::Success
            },
            duration_seconds: Some(duration_seconds),
            cost_usd: Some(cost_usd),
            traces,
            from_cache: false,
            preserve_credits: self.preserve_credits,
            source: self.source,
            metadata: Some(self.metadata),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Provider;
    use serde_json::json;

    fn builder() -> CompletionBuilder {
        CompletionBuilder::new(
            Agent::default(),
            Version::default(),
            AgentInput::default(),
            vec![],
            CompletionSource::Api,
            BTreeMap::new(),
        )
    }

    fn attempt(provider: Provider, cost: f64, duration: f64) -> LlmCompletion {
        let mut c = LlmCompletion::new(provider, "m");
        c.duration_seconds = Some(duration);
        c.usage.prompt_cost_usd = Some(cost / 2.0);
        c.usage.completion_cost_usd = Some(cost / 2.0);
        c
    }

    #[test]
    fn cost_and_duration_sum_over_attempts() {
        let mut b = builder();
        b.add_attempt(attempt(Provider::Groq, 0.5, 1.0));
        b.add_attempt(attempt(Provider::OpenAi, 0.25, 2.0));
        let completion = b.build(RunnerOutput::default(), None);
        assert!((completion.cost_usd.unwrap() - 0.75).abs() < 1e-9);
        assert!((completion.duration_seconds.unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(completion.status, CompletionStatus::Success);
        assert_eq!(completion.traces.len(), 2);
        let providers = &completion.metadata.as_ref().unwrap()["anotherai.providers"];
        assert_eq!(providers, &json!(["groq", "openai"]));
    }

    #[test]
    fn an_error_marks_the_completion_failed() {
        let completion = builder().build(
            RunnerOutput::default(),
            Some(ErrorPayload {
                code: "provider_error".into(),
                message: "boom".into(),
                status_code: 502,
            }),
        );
        assert_eq!(completion.status, CompletionStatus::Failure);
        assert_eq!(
            completion.agent_output.error.as_ref().unwrap().code,
            "provider_error"
        );
    }

    #[test]
    fn append_metadata_promotes_scalars_to_lists() {
        let mut b = builder();
        b.add_metadata("k", json!("a"));
        b.append_metadata("k", json!("b"));
        assert_eq!(b.metadata["k"], json!(["a", "b"]));
    }
}
