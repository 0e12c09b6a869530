//! Provider identifiers.

use serde::{Deserialize, Serialize};

/// Inference providers, ordered by fallback priority: when a model is served
/// by several providers, candidates are tried in the order of this enum.
///
/// Anthropic ranks above Bedrock for Claude models: Bedrock throttles
/// instead of returning 429s, which defeats fallback classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Groq,
    Fireworks,
    Anthropic,
    AmazonBedrock,
    AzureOpenai,
    #[serde(rename = "openai")]
    OpenAi,
    Google,
    MistralAi,
    GoogleGemini,
    #[serde(rename = "xai")]
    XAi,
}

impl Provider {
    /// All providers in fallback priority order.
    pub const ALL: [Provider; 10] = [
        Provider::Groq,
        Provider::Fireworks,
        Provider::Anthropic,
        Provider::AmazonBedrock,
        Provider::AzureOpenai,
        Provider::OpenAi,
        Provider::Google,
        Provider::MistralAi,
        Provider::GoogleGemini,
        Provider::XAi,
    ];

    /// The wire name of the provider (also the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Groq => "groq",
            Provider::Fireworks => "fireworks",
            Provider::Anthropic => "anthropic",
            Provider::AmazonBedrock => "amazon_bedrock",
            Provider::AzureOpenai => "azure_openai",
            Provider::OpenAi => "openai",
            Provider::Google => "google",
            Provider::MistralAi => "mistral_ai",
            Provider::GoogleGemini => "google_gemini",
            Provider::XAi => "xai",
        }
    }

    /// Parse a wire name. Returns `None` for unknown providers.
    pub fn parse(s: &str) -> Option<Provider> {
        Provider::ALL.iter().copied().find(|p| p.as_str() == s)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips_all_providers() {
        for p in Provider::ALL {
            assert_eq!(Provider::parse(p.as_str()), Some(p));
        }
        assert_eq!(Provider::parse("aws"), None);
    }

    #[test]
    fn priority_order_is_stable() {
        assert_eq!(Provider::ALL[0], Provider::Groq);
        assert_eq!(Provider::ALL[2], Provider::Anthropic);
        assert!(Provider::Groq < Provider::OpenAi);
    }
}
