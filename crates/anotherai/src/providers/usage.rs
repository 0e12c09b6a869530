//! Per-attempt usage accounting.

use serde::{Deserialize, Serialize};

use crate::domain::{
    CompletionUsage, InferenceUsage, LlmTrace, PromptUsage, Provider, Trace,
};
use crate::error::ErrorPayload;
use crate::models::ModelPricing;

/// Raw usage reported by a provider for one inference call. Costs are
/// filled from the model pricing once the attempt settles.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_token_count: Option<f64>,
    /// Part of the prompt served from the provider prompt cache.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_token_count_cached: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_audio_token_count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_audio_duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_image_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_image_token_count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_token_count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_cost_usd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_token_count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_image_token_count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_image_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_context_window_size: Option<u32>,
}

impl LlmUsage {
    /// Total cost, only when both sides have been priced.
    ///
    /// A missing side means accounting went wrong somewhere; better no
    /// value than a false one.
    pub fn cost_usd(&self) -> Option<f64> {
        match (self.prompt_cost_usd, self.completion_cost_usd) {
            (Some(p), Some(c)) => Some(p + c),
            _ => None,
        }
    }

    /// Fill both cost sides from the model pricing.
    pub fn apply_pricing(&mut self, pricing: &ModelPricing) {
        self.prompt_cost_usd = Some(pricing.prompt_cost_usd(
            self.prompt_token_count.unwrap_or(0.0),
            self.prompt_token_count_cached.unwrap_or(0.0),
        ));
        self.completion_cost_usd = Some(pricing.completion_cost_usd(
            self.completion_token_count.unwrap_or(0.0),
            self.reasoning_token_count.unwrap_or(0.0),
        ));
    }

    /// Merge fields set on `other` into self. Later chunks win.
    pub fn merge(&mut self, other: &LlmUsage) {
        macro_rules! take {
            ($field:ident) => {
                if other.$field.is_some() {
                    self.$field = other.$field.clone();
                }
            };
        }
        take!(prompt_token_count);
        take!(prompt_token_count_cached);
        take!(prompt_cost_usd);
        take!(prompt_audio_token_count);
        take!(prompt_audio_duration_seconds);
        take!(prompt_image_count);
        take!(prompt_image_token_count);
        take!(completion_token_count);
        take!(completion_cost_usd);
        take!(reasoning_token_count);
        take!(completion_image_token_count);
        take!(completion_image_count);
        take!(model_context_window_size);
    }

    /// Convert into the domain usage stored on traces.
    pub fn to_domain(&self) -> InferenceUsage {
        InferenceUsage {
            prompt: PromptUsage {
                text_token_count: self.prompt_token_count,
                audio_token_count: self.prompt_audio_token_count,
                audio_count: None,
                image_token_count: self.prompt_image_token_count,
                image_count: self.prompt_image_count,
                cached_token_count: self.prompt_token_count_cached,
                cost_usd: self.prompt_cost_usd.unwrap_or(0.0),
            },
            completion: CompletionUsage {
                text_token_count: self.completion_token_count,
                image_token_count: self.completion_image_token_count,
                image_count: self.completion_image_count,
                reasoning_token_count: self.reasoning_token_count,
                cost_usd: self.completion_cost_usd.unwrap_or(0.0),
            },
        }
    }
}

/// The record of one provider attempt, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCompletion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Raw response text, when any was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub usage: LlmUsage,
    pub provider: Provider,
    pub model: String,
    /// Suppresses credit debits for this completion (internal traffic).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_credits: Option<bool>,
    /// Billing override; `None` falls back to the heuristic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_request_incurs_cost: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl LlmCompletion {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        LlmCompletion {
            duration_seconds: None,
            response: None,
            usage: LlmUsage::default(),
            provider,
            model: model.into(),
            preserve_credits: None,
            provider_request_incurs_cost: None,
            error: None,
        }
    }

    /// Whether the request is billable. The explicit flag wins; otherwise
    /// any generated image forces billing, and an empty response with zero
    /// completion tokens is free.
    pub fn should_incur_cost(&self) -> bool {
        if let Some(flag) = self.provider_request_incurs_cost {
            return flag;
        }
        if self.usage.completion_image_count.unwrap_or(0) > 0 {
            return true;
        }
        !(self.response.is_none() && self.usage.completion_token_count.unwrap_or(0.0) == 0.0)
    }

    /// Price the attempt. Non-billable attempts (empty response with zero
    /// completion tokens, or explicitly flagged) get an explicit zero cost
    /// rather than no cost, so downstream sums stay defined.
    pub fn apply_pricing(&mut self, pricing: &ModelPricing) {
        if self.should_incur_cost() {
            self.usage.apply_pricing(pricing);
        } else {
            self.usage.prompt_cost_usd = Some(0.0);
            self.usage.completion_cost_usd = Some(0.0);
        }
    }

    /// Convert into the trace stored on the completion.
    pub fn to_trace(&self) -> Trace {
        Trace::Llm(LlmTrace {
            model: self.model.clone(),
            provider: self.provider,
            usage: Some(self.usage.to_domain()),
            duration_seconds: self.duration_seconds.unwrap_or(0.0),
            cost_usd: self.usage.cost_usd().unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_requires_both_sides() {
        let mut usage = LlmUsage {
            prompt_cost_usd: Some(0.5),
            ..Default::default()
        };
        assert_eq!(usage.cost_usd(), None);
        usage.completion_cost_usd = Some(0.25);
        assert_eq!(usage.cost_usd(), Some(0.75));
    }

    #[test]
    fn pricing_fills_costs() {
        let mut usage = LlmUsage {
            prompt_token_count: Some(1000.0),
            completion_token_count: Some(500.0),
            ..Default::default()
        };
        usage.apply_pricing(&ModelPricing::new(1.0, 2.0));
        assert!((usage.prompt_cost_usd.unwrap() - 0.001).abs() < 1e-9);
        assert!((usage.completion_cost_usd.unwrap() - 0.001).abs() < 1e-9);
    }

    #[test]
    fn billing_heuristic() {
        let mut completion = LlmCompletion::new(Provider::OpenAi, "gpt-4.1-mini");
        // Empty response, no tokens: free.
        assert!(!completion.should_incur_cost());
        completion.usage.completion_token_count = Some(3.0);
        assert!(completion.should_incur_cost());

        let mut image_only = LlmCompletion::new(Provider::OpenAi, "gpt-4.1-mini");
        image_only.usage.completion_image_count = Some(1);
        assert!(image_only.should_incur_cost());

        let mut flagged = LlmCompletion::new(Provider::OpenAi, "gpt-4.1-mini");
        flagged.response = Some("hi".into());
        flagged.provider_request_incurs_cost = Some(false);
        assert!(!flagged.should_incur_cost());
    }

    #[test]
    fn pricing_is_gated_on_the_billing_heuristic() {
        let pricing = ModelPricing::new(1.0, 2.0);

        // Free attempt: prompt tokens were consumed but nothing came back.
        let mut free = LlmCompletion::new(Provider::OpenAi, "gpt-4.1-mini");
        free.usage.prompt_token_count = Some(1_000_000.0);
        free.apply_pricing(&pricing);
        assert_eq!(free.usage.cost_usd(), Some(0.0));

        // Billable attempt: costs computed from the counts.
        let mut billable = LlmCompletion::new(Provider::OpenAi, "gpt-4.1-mini");
        billable.response = Some("42.".into());
        billable.usage.prompt_token_count = Some(1_000_000.0);
        billable.usage.completion_token_count = Some(500_000.0);
        billable.apply_pricing(&pricing);
        assert!((billable.usage.cost_usd().unwrap() - 2.0).abs() < 1e-9);

        // A generated image forces billing even with an empty response.
        let mut image = LlmCompletion::new(Provider::OpenAi, "gpt-4.1-mini");
        image.usage.completion_image_count = Some(1);
        image.usage.prompt_token_count = Some(1_000_000.0);
        image.apply_pricing(&pricing);
        assert!(image.usage.cost_usd().unwrap() > 0.0);

        // The explicit non-billable flag wins over produced tokens.
        let mut flagged = LlmCompletion::new(Provider::OpenAi, "gpt-4.1-mini");
        flagged.response = Some("hi".into());
        flagged.usage.completion_token_count = Some(5.0);
        flagged.provider_request_incurs_cost = Some(false);
        flagged.apply_pricing(&pricing);
        assert_eq!(flagged.usage.cost_usd(), Some(0.0));
    }
}
