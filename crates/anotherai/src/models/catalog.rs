//! The model catalog data.

use crate::domain::Provider;

use super::{ModelData, ModelPricing, ModelReasoningBudget};

const OPENAI_FAMILY: &[Provider] = &[Provider::AzureOpenai, Provider::OpenAi];
const ANTHROPIC_FAMILY: &[Provider] = &[Provider::Anthropic, Provider::AmazonBedrock];
const GOOGLE_FAMILY: &[Provider] = &[Provider::Google, Provider::GoogleGemini];
const OSS_FAMILY: &[Provider] = &[Provider::Groq, Provider::Fireworks];

/// All served models. Order is the order the models endpoint lists them in.
pub static CATALOG: &[ModelData] = &[
    ModelData {
        id: "gpt-4.1",
        display_name: "GPT-4.1",
        providers: OPENAI_FAMILY,
        context_window: 1_047_576,
        max_output_tokens: 32_768,
        pricing: ModelPricing::new(2.00, 8.00),
        reasoning: None,
        supports_structured_output: true,
    },
    ModelData {
        id: "gpt-4.1-mini",
        display_name: "GPT-4.1 Mini",
        providers: OPENAI_FAMILY,
        context_window: 1_047_576,
        max_output_tokens: 32_768,
        pricing: ModelPricing::new(0.40, 1.60),
        reasoning: None,
        supports_structured_output: true,
    },
    ModelData {
        id: "gpt-4.1-nano",
        display_name: "GPT-4.1 Nano",
        providers: OPENAI_FAMILY,
        context_window: 1_047_576,
        max_output_tokens: 32_768,
        pricing: ModelPricing::new(0.10, 0.40),
        reasoning: None,
        supports_structured_output: true,
    },
    ModelData {
        id: "gpt-4o",
        display_name: "GPT-4o",
        providers: OPENAI_FAMILY,
        context_window: 128_000,
        max_output_tokens: 16_384,
        pricing: ModelPricing::new(2.50, 10.00).with_cached_multiplier(0.5),
        reasoning: None,
        supports_structured_output: true,
    },
    ModelData {
        id: "gpt-4o-mini",
        display_name: "GPT-4o Mini",
        providers: OPENAI_FAMILY,
        context_window: 128_000,
        max_output_tokens: 16_384,
        pricing: ModelPricing::new(0.15, 0.60).with_cached_multiplier(0.5),
        reasoning: None,
        supports_structured_output: true,
    },
    ModelData {
        id: "o3",
        display_name: "o3",
        providers: OPENAI_FAMILY,
        context_window: 200_000,
        max_output_tokens: 100_000,
        pricing: ModelPricing::new(2.00, 8.00),
        reasoning: Some(ModelReasoningBudget {
            min: 1024,
            max: 100_000,
            low: Some(1024),
            medium: Some(8192),
            high: Some(24_576),
        }),
        supports_structured_output: true,
    },
    ModelData {
        id: "claude-sonnet-4",
        display_name: "Claude Sonnet 4",
        providers: ANTHROPIC_FAMILY,
        context_window: 200_000,
        max_output_tokens: 64_000,
        pricing: ModelPricing::new(3.00, 15.00).with_cached_multiplier(0.1),
        reasoning: Some(ModelReasoningBudget {
            min: 1024,
            max: 64_000,
            low: Some(2048),
            medium: Some(8192),
            high: Some(32_768),
        }),
        supports_structured_output: false,
    },
    ModelData {
        id: "claude-3-7-sonnet",
        display_name: "Claude 3.7 Sonnet",
        providers: ANTHROPIC_FAMILY,
        context_window: 200_000,
        max_output_tokens: 64_000,
        pricing: ModelPricing::new(3.00, 15.00).with_cached_multiplier(0.1),
        reasoning: Some(ModelReasoningBudget {
            min: 1024,
            max: 64_000,
            low: Some(2048),
            medium: Some(8192),
            high: Some(32_768),
        }),
        supports_structured_output: false,
    },
    ModelData {
        id: "claude-3-5-haiku",
        display_name: "Claude 3.5 Haiku",
        providers: ANTHROPIC_FAMILY,
        context_window: 200_000,
        max_output_tokens: 8192,
        pricing: ModelPricing::new(0.80, 4.00).with_cached_multiplier(0.1),
        reasoning: None,
        supports_structured_output: false,
    },
    ModelData {
        id: "gemini-2.5-pro",
        display_name: "Gemini 2.5 Pro",
        providers: GOOGLE_FAMILY,
        context_window: 1_048_576,
        max_output_tokens: 65_536,
        pricing: ModelPricing::new(1.25, 10.00),
        reasoning: Some(ModelReasoningBudget {
            min: 128,
            max: 32_768,
            low: Some(1024),
            medium: Some(8192),
            high: Some(24_576),
        }),
        supports_structured_output: true,
    },
    ModelData {
        id: "gemini-2.5-flash",
        display_name: "Gemini 2.5 Flash",
        providers: GOOGLE_FAMILY,
        context_window: 1_048_576,
        max_output_tokens: 65_536,
        pricing: ModelPricing::new(0.30, 2.50),
        reasoning: Some(ModelReasoningBudget {
            min: 0,
            max: 24_576,
            low: Some(1024),
            medium: Some(8192),
            high: Some(24_576),
        }),
        supports_structured_output: true,
    },
    ModelData {
        id: "llama-4-maverick",
        display_name: "Llama 4 Maverick",
        providers: OSS_FAMILY,
        context_window: 131_072,
        max_output_tokens: 8192,
        pricing: ModelPricing::new(0.20, 0.60),
        reasoning: None,
        supports_structured_output: true,
    },
    ModelData {
        id: "llama-3.3-70b",
        display_name: "Llama 3.3 70B",
        providers: OSS_FAMILY,
        context_window: 131_072,
        max_output_tokens: 8192,
        pricing: ModelPricing::new(0.59, 0.79),
        reasoning: None,
        supports_structured_output: true,
    },
    ModelData {
        id: "deepseek-r1",
        display_name: "DeepSeek R1",
        providers: &[Provider::Fireworks, Provider::Groq],
        context_window: 131_072,
        max_output_tokens: 16_384,
        pricing: ModelPricing::new(3.00, 8.00),
        // R1 reasons unconditionally and streams its chain of thought in
        // <think> tags; there is no effort knob.
        reasoning: Some(ModelReasoningBudget {
            min: 0,
            max: 32_768,
            low: None,
            medium: None,
            high: None,
        }),
        supports_structured_output: false,
    },
    ModelData {
        id: "grok-3",
        display_name: "Grok 3",
        providers: &[Provider::XAi],
        context_window: 131_072,
        max_output_tokens: 16_384,
        pricing: ModelPricing::new(3.00, 15.00),
        reasoning: None,
        supports_structured_output: true,
    },
    ModelData {
        id: "grok-3-mini",
        display_name: "Grok 3 Mini",
        providers: &[Provider::XAi],
        context_window: 131_072,
        max_output_tokens: 16_384,
        pricing: ModelPricing::new(0.30, 0.50),
        reasoning: Some(ModelReasoningBudget {
            min: 0,
            max: 16_384,
            low: Some(1024),
            medium: None,
            high: Some(8192),
        }),
        supports_structured_output: true,
    },
    ModelData {
        id: "mistral-large-2",
        display_name: "Mistral Large 2",
        providers: &[Provider::MistralAi],
        context_window: 131_072,
        max_output_tokens: 8192,
        pricing: ModelPricing::new(2.00, 6.00),
        reasoning: None,
        supports_structured_output: true,
    },
];

/// Alias model ids mapping to concrete catalog entries.
static ALIASES: &[(&str, &str)] = &[
    ("gpt-4.1-latest", "gpt-4.1"),
    ("gpt-4o-latest", "gpt-4o"),
    ("claude-sonnet-4-0", "claude-sonnet-4"),
    ("claude-sonnet-latest", "claude-sonnet-4"),
    ("gemini-flash-latest", "gemini-2.5-flash"),
    ("gemini-pro-latest", "gemini-2.5-pro"),
];

/// Iterate over every concrete model.
pub fn all_models() -> impl Iterator<Item = &'static ModelData> {
    CATALOG.iter()
}

/// Resolve a model id: exact catalog match first, then aliases.
pub fn resolve(model: &str) -> Option<&'static ModelData> {
    if let Some(data) = CATALOG.iter().find(|m| m.id == model) {
        return Some(data);
    }
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == model)
        .and_then(|(_, target)| CATALOG.iter().find(|m| m.id == *target))
}

/// Whether the requested id was an alias rather than a concrete model.
pub fn is_alias(model: &str) -> bool {
    ALIASES.iter().any(|(alias, _)| *alias == model)
}

/// Suggest the catalog id nearest to an unknown model string, for error
/// messages. Distance threshold keeps wild inputs from matching anything.
pub fn suggest(model: &str) -> Option<&'static str> {
    CATALOG
        .iter()
        .map(|m| (levenshtein(model, m.id), m.id))
        .min()
        .filter(|(distance, _)| *distance <= 6)
        .map(|(_, id)| id)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_alias_resolution() {
        assert_eq!(resolve("gpt-4.1-mini").map(|m| m.id), Some("gpt-4.1-mini"));
        assert_eq!(resolve("gpt-4.1-latest").map(|m| m.id), Some("gpt-4.1"));
        assert!(is_alias("gpt-4.1-latest"));
        assert!(!is_alias("gpt-4.1"));
        assert!(resolve("gpt-5-ultra").is_none());
    }

    #[test]
    fn suggestion_finds_near_misses() {
        assert_eq!(suggest("gpt-4.1-mini2"), Some("gpt-4.1-mini"));
        assert_eq!(suggest("claude-sonet-4"), Some("claude-sonnet-4"));
        assert_eq!(suggest("totally-unrelated-model-xyz"), None);
    }

    #[test]
    fn every_model_has_a_provider_and_positive_prices() {
        for model in all_models() {
            assert!(!model.providers.is_empty(), "{} has no provider", model.id);
            assert!(model.pricing.prompt_usd_per_million > 0.0);
            assert!(model.pricing.completion_usd_per_million > 0.0);
        }
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }
}
