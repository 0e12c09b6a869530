//! Deployments: stable aliases bound to a specific version.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::version::Version;

/// A mutable alias (e.g. "production", "dev", "staging") pointing at a
/// content-addressed version. The version pointer may be rotated; archival
/// sets `archived_at`, records are never hard-deleted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Deployment {
    /// User-chosen alias, unique within the tenant.
    pub id: String,
    pub agent_id: String,
    pub version: Version,
    pub created_by: String,
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl Deployment {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}
