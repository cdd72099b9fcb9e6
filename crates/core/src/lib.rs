//! Beluga core types and errors.
//!
//! Shared by every component crate: the error taxonomy upstream layers map
//! to response codes, the caller identity, and the narrow capability set
//! the access layer needs from any stored resource kind.

#![forbid(unsafe_code)]

pub mod conditions;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use conditions::{Condition, ConditionStatus};

/// Errors surfaced by the access layer.
///
/// Variants are stable: callers switch on the discriminant, never on the
/// message text. The message carries context for logs and user-facing
/// diagnostics only.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("not found: {0}")]
    NotFound(String),
    /// Authorization denied by the store. Role-binding propagation is
    /// asynchronous, so a fresh grant may briefly look like this; only the
    /// retrying client wrapper retries it, and only up to its policy limit.
    #[error("authorization denied: {0}")]
    Forbidden(String),
    /// Concurrent modification detected by the store. Never retried here;
    /// the caller decides whether to re-read and try again.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Bad selector syntax, invalid metadata key, malformed input. Never
    /// retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Condition not met within the awaiter deadline. Distinct from
    /// [`AccessError::ObjectGone`] so callers can say "still processing"
    /// rather than "it was deleted".
    #[error("timed out waiting for {0}")]
    Timeout(String),
    /// Object deleted while a condition was being awaited.
    #[error("{0} was deleted before the condition was met")]
    ObjectGone(String),
    /// Anything the taxonomy cannot classify.
    #[error("internal: {0}")]
    Internal(String),
}

impl AccessError {
    pub fn is_forbidden(&self) -> bool {
        matches!(self, AccessError::Forbidden(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AccessError::NotFound(_))
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

/// Principal kind derived from the caller credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityKind {
    User,
    ServiceAccount,
}

/// Derived caller principal. Opaque to this layer: it is only handed to the
/// namespace resolver, and never cached beyond a single call chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub kind: IdentityKind,
}

impl Identity {
    pub fn user(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: IdentityKind::User }
    }

    pub fn service_account(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: IdentityKind::ServiceAccount }
    }
}

/// Capability set the access layer needs from a stored object.
///
/// Per-resource adapter types implement this; the core never names concrete
/// kinds. Lifecycle of the object itself belongs to the remote store and
/// its reconciler.
pub trait ObjectState: Clone + Send + Sync + 'static {
    fn name(&self) -> &str;
    fn namespace(&self) -> &str;

    fn labels(&self) -> Option<&BTreeMap<String, String>>;
    /// Mutable label map, initialized empty when absent.
    fn labels_mut(&mut self) -> &mut BTreeMap<String, String>;

    fn annotations(&self) -> Option<&BTreeMap<String, String>>;
    /// Mutable annotation map, initialized empty when absent.
    fn annotations_mut(&mut self) -> &mut BTreeMap<String, String>;

    /// Observed status conditions maintained by the remote reconciler.
    fn conditions(&self) -> &[Condition];

    /// Spec generation as last persisted by the store.
    fn generation(&self) -> Option<i64> {
        None
    }
}

/// A concrete generic object for dynamic adapters and tests.
///
/// Resource kinds with their own typed representation implement
/// [`ObjectState`] directly instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ObjectRecord {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into(), ..Default::default() }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.get_or_insert_with(BTreeMap::new).insert(key.into(), value.into());
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Lexicographically sortable creation timestamp (RFC 3339, UTC).
    /// Objects without one sort first.
    pub fn created_at_key(&self) -> String {
        self.created_at.map(|t| t.to_rfc3339()).unwrap_or_default()
    }
}

impl ObjectState for ObjectRecord {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.labels.as_ref()
    }

    fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.labels.get_or_insert_with(BTreeMap::new)
    }

    fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.annotations.as_ref()
    }

    fn annotations_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.annotations.get_or_insert_with(BTreeMap::new)
    }

    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn generation(&self) -> Option<i64> {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_mut_initializes_absent_map() {
        let mut rec = ObjectRecord::new("ns", "obj");
        assert!(rec.labels().is_none());
        rec.labels_mut().insert("a".into(), "1".into());
        assert_eq!(rec.labels().unwrap().get("a"), Some(&"1".to_string()));
    }

    #[test]
    fn created_at_key_sorts_missing_first() {
        let old = ObjectRecord {
            created_at: Some(Utc::now()),
            ..ObjectRecord::new("ns", "old")
        };
        let unset = ObjectRecord::new("ns", "unset");
        assert!(unset.created_at_key() < old.created_at_key());
    }
}
