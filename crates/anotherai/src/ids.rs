//! Boundary identifiers.
//!
//! External ids are rendered `anotherai/<kind>/<id>`. Version, input and
//! output ids are 32-hex content hashes; completion ids are UUIDv7.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::utils::hash::HASH_REGEXP_32;
use crate::utils::uuid7::UUID7_REGEXP;

const ID_PREFIX: &str = "anotherai/";

/// Kinds of externally addressable objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdType {
    Version,
    Deployment,
    Experiment,
    Completion,
    Input,
    Output,
    Annotation,
    Agent,
}

static HASH_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // compile-time constant pattern
    let re = Regex::new(HASH_REGEXP_32).unwrap();
    re
});
static UUID7_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // compile-time constant pattern
    let re = Regex::new(UUID7_REGEXP).unwrap();
    re
});

impl IdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdType::Version => "version",
            IdType::Deployment => "deployment",
            IdType::Experiment => "experiment",
            IdType::Completion => "completion",
            IdType::Input => "input",
            IdType::Output => "output",
            IdType::Annotation => "annotation",
            IdType::Agent => "agent",
        }
    }

    fn parse(s: &str) -> Option<IdType> {
        [
            IdType::Version,
            IdType::Deployment,
            IdType::Experiment,
            IdType::Completion,
            IdType::Input,
            IdType::Output,
            IdType::Annotation,
            IdType::Agent,
        ]
        .into_iter()
        .find(|t| t.as_str() == s)
    }

    /// Render the external form of an id.
    pub fn wrap(&self, id: &str) -> String {
        format!("{ID_PREFIX}{}/{id}", self.as_str())
    }

    /// Regexp the bare id must match, when the kind constrains its shape.
    fn expected_regexp(&self) -> Option<&'static Regex> {
        match self {
            IdType::Version | IdType::Input | IdType::Output => Some(&HASH_RE),
            IdType::Completion => Some(&UUID7_RE),
            _ => None,
        }
    }
}

/// Strip an optional `anotherai/<kind>/` prefix. Returns the detected kind
/// and the bare id; values that do not look like wrapped ids pass through
/// untouched (they might be custom ids).
pub fn extract_id(value: &str) -> (Option<IdType>, &str) {
    let stripped = value.strip_prefix(ID_PREFIX).unwrap_or(value);
    let mut splits = stripped.splitn(2, '/');
    let (Some(head), Some(rest)) = (splits.next(), splits.next()) else {
        return (None, value);
    };
    match IdType::parse(head) {
        Some(kind) => (Some(kind), rest),
        None => (None, value),
    }
}

/// Validate and unwrap an id of the expected kind.
///
/// A wrapped id of a different kind, or a bare id that fails the kind's
/// shape check, is a `bad_request`.
pub fn sanitize_id(value: &str, expected: IdType) -> Result<String> {
    let (kind, bare) = extract_id(value);
    if let Some(kind) = kind {
        if kind != expected {
            return Err(Error::BadRequest(format!(
                "Invalid {} id: {value}",
                expected.as_str()
            )));
        }
    }
    if let Some(re) = expected.expected_regexp() {
        if !re.is_match(bare) {
            return Err(Error::BadRequest(format!(
                "Invalid {} id: {value}",
                expected.as_str()
            )));
        }
    }
    Ok(bare.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::uuid7::uuid7;

    #[test]
    fn wrapped_ids_unwrap() {
        let id = uuid7().to_string();
        let wrapped = IdType::Completion.wrap(&id);
        assert_eq!(wrapped, format!("anotherai/completion/{id}"));
        assert_eq!(sanitize_id(&wrapped, IdType::Completion).unwrap(), id);
    }

    #[test]
    fn bare_ids_are_validated() {
        let hash = "0123456789abcdef0123456789abcdef";
        assert_eq!(sanitize_id(hash, IdType::Version).unwrap(), hash);
        assert!(sanitize_id("invalid-id", IdType::Completion).is_err());
        assert!(sanitize_id("not-a-hash", IdType::Version).is_err());
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let wrapped = IdType::Version.wrap("0123456789abcdef0123456789abcdef");
        assert!(sanitize_id(&wrapped, IdType::Input).is_err());
    }

    #[test]
    fn unconstrained_kinds_accept_custom_ids() {
        assert_eq!(
            sanitize_id("my-deployment:prod#1", IdType::Deployment).unwrap(),
            "my-deployment:prod#1"
        );
        // A slash inside an unknown prefix passes through whole.
        assert_eq!(
            sanitize_id("custom/thing", IdType::Deployment).unwrap(),
            "custom/thing"
        );
    }
}
