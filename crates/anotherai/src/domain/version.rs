//! Content-addressed prompt+model configurations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::message::Message;
use crate::domain::options::{CacheUsage, FallbackOption, ReasoningEffort};
use crate::domain::provider::Provider;
use crate::domain::tool::{Tool, ToolChoice};
use crate::utils::hash::hash_object;

/// A prompt+model configuration. The id is a content hash of the normalized
/// fields: two versions with identical semantics share the same id, and
/// persisting the same logical version twice is a no-op.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Version {
    /// Content hash, filled by [`Version::assign_id`]. Excluded from the
    /// hashed payload.
    #[serde(default)]
    pub id: String,

    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// JSON-Schema constraining the output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_budget: Option<u32>,
    /// Templated prompt messages rendered against the input variables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Vec<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_cache: Option<CacheUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_fallback: Option<FallbackOption>,
}

impl Version {
    /// Content hash of the normalized version fields, ignoring `id`.
    pub fn compute_id(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(map) = value.as_object_mut() {
            map.remove("id");
        }
        hash_object(&value)
    }

    /// Fill `id` from the content hash and return self.
    #[must_use]
    pub fn assign_id(mut self) -> Self {
        self.id = self.compute_id();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version() -> Version {
        Version {
            model: "gpt-4.1-mini".into(),
            temperature: Some(0.5),
            ..Default::default()
        }
    }

    #[test]
    fn identical_versions_share_an_id() {
        assert_eq!(version().compute_id(), version().compute_id());
    }

    #[test]
    fn id_field_does_not_feed_the_hash() {
        let mut a = version();
        a.id = "something".into();
        assert_eq!(a.compute_id(), version().compute_id());
    }

    #[test]
    fn unset_fields_hash_like_omitted_fields() {
        let mut a = version();
        a.top_p = None;
        assert_eq!(a.compute_id(), version().compute_id());

        let mut b = version();
        b.top_p = Some(0.9);
        assert_ne!(b.compute_id(), version().compute_id());
    }
}
