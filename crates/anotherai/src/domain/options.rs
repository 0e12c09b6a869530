//! Run option enums shared between requests and versions.

use serde::{Deserialize, Serialize};

/// Completion cache policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheUsage {
    /// Look up the cache, fall back to a live call on miss.
    #[default]
    Auto,
    /// Only serve from cache; a miss triggers a live call and stores it.
    Always,
    /// Skip the cache entirely.
    Never,
}

/// Provider fallback policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackOption {
    /// Retry the next candidate provider on retryable failures.
    #[default]
    Auto,
    /// Fail on the first provider error.
    Never,
}

/// Requested reasoning intensity. A model maps each effort to a token
/// budget through its [`ModelReasoningBudget`](crate::models::ModelReasoningBudget).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Disabled,
    Low,
    Medium,
    High,
}

/// Where a completion originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSource {
    Web,
    #[default]
    Api,
    Mcp,
}
