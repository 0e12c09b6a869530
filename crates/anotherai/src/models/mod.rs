//! Static model catalog: supported providers, pricing, context limits and
//! reasoning budgets per model.

mod catalog;

pub use catalog::{all_models, is_alias, resolve, suggest, CATALOG};

use crate::domain::ReasoningEffort;
use crate::domain::Provider;

/// Pricing in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub prompt_usd_per_million: f64,
    pub completion_usd_per_million: f64,
    /// Multiplier applied to the prompt price for cache-hit tokens.
    pub cached_prompt_multiplier: f64,
}

impl ModelPricing {
    pub const fn new(prompt: f64, completion: f64) -> Self {
        ModelPricing {
            prompt_usd_per_million: prompt,
            completion_usd_per_million: completion,
            cached_prompt_multiplier: 0.25,
        }
    }

    pub const fn with_cached_multiplier(mut self, multiplier: f64) -> Self {
        self.cached_prompt_multiplier = multiplier;
        self
    }

    /// Prompt-side cost: cached tokens are billed at the discounted rate.
    pub fn prompt_cost_usd(&self, prompt_tokens: f64, cached_tokens: f64) -> f64 {
        let cached = cached_tokens.min(prompt_tokens);
        let fresh = prompt_tokens - cached;
        (fresh * self.prompt_usd_per_million
            + cached * self.prompt_usd_per_million * self.cached_prompt_multiplier)
            / 1_000_000.0
    }

    /// Completion-side cost: reasoning tokens are billed as completion
    /// tokens.
    pub fn completion_cost_usd(&self, completion_tokens: f64, reasoning_tokens: f64) -> f64 {
        (completion_tokens + reasoning_tokens) * self.completion_usd_per_million / 1_000_000.0
    }
}

/// The reasoning-token window a model supports, with per-effort budgets.
/// A `None` effort entry means the model does not support that effort.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelReasoningBudget {
    pub min: u32,
    pub max: u32,
    pub low: Option<u32>,
    pub medium: Option<u32>,
    pub high: Option<u32>,
}

impl ModelReasoningBudget {
    /// Budget for a requested effort, `None` when unsupported.
    pub fn budget_for_effort(&self, effort: ReasoningEffort) -> Option<u32> {
        match effort {
            ReasoningEffort::Disabled => Some(0),
            ReasoningEffort::Low => self.low,
            ReasoningEffort::Medium => self.medium,
            ReasoningEffort::High => self.high,
        }
    }

    /// Clamp a user-provided budget into the supported window.
    pub fn clamp(&self, budget: u32) -> u32 {
        budget.clamp(self.min, self.max)
    }

    /// Nearest effort for a given budget: the largest configured effort
    /// whose budget does not exceed the requested one.
    pub fn effort_for_budget(&self, budget: u32) -> ReasoningEffort {
        if budget == 0 {
            return ReasoningEffort::Disabled;
        }
        let mut effort = ReasoningEffort::Low;
        for (candidate, configured) in [
            (ReasoningEffort::Medium, self.medium),
            (ReasoningEffort::High, self.high),
        ] {
            if let Some(configured) = configured {
                if budget >= configured {
                    effort = candidate;
                }
            }
        }
        effort
    }
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelData {
    /// Canonical model id.
    pub id: &'static str,
    pub display_name: &'static str,
    /// Providers able to serve this model, in fallback priority order.
    pub providers: &'static [Provider],
    pub context_window: u32,
    pub max_output_tokens: u32,
    pub pricing: ModelPricing,
    pub reasoning: Option<ModelReasoningBudget>,
    /// Whether the provider can enforce an output schema natively.
    pub supports_structured_output: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_applies_cached_discount() {
        let pricing = ModelPricing::new(1.0, 2.0);
        // 1M fresh tokens = $1, 1M cached = $0.25
        let cost = pricing.prompt_cost_usd(2_000_000.0, 1_000_000.0);
        assert!((cost - 1.25).abs() < 1e-9);
        // Cached count is capped by the prompt count.
        let cost = pricing.prompt_cost_usd(1_000_000.0, 5_000_000.0);
        assert!((cost - 0.25).abs() < 1e-9);
    }

    #[test]
    fn reasoning_budget_clamps_and_maps() {
        let budget = ModelReasoningBudget {
            min: 1024,
            max: 32_768,
            low: Some(2048),
            medium: Some(8192),
            high: Some(24_576),
        };
        assert_eq!(budget.clamp(100), 1024);
        assert_eq!(budget.clamp(1_000_000), 32_768);
        assert_eq!(budget.clamp(4096), 4096);
        assert_eq!(
            budget.budget_for_effort(ReasoningEffort::Medium),
            Some(8192)
        );
        assert_eq!(budget.effort_for_budget(10_000), ReasoningEffort::Medium);
        assert_eq!(budget.effort_for_budget(30_000), ReasoningEffort::High);
        assert_eq!(budget.effort_for_budget(0), ReasoningEffort::Disabled);
    }
}
