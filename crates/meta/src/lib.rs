//! Metadata patch engine: set/delete semantics over an object's label and
//! annotation maps, with pluggable key validation.
//!
//! Application is all-or-nothing. Validation runs only against keys whose
//! value actually changes: re-writing an equal value or deleting an absent
//! key is a no-op and is never validated, so objects carrying legacy keys
//! that today's policy would reject stay patchable.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use beluga_core::{AccessError, ObjectState};
use serde::{Deserialize, Serialize};

/// Partial update to an object's metadata. `None` is the delete marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPatch {
    pub labels: BTreeMap<String, Option<String>>,
    pub annotations: BTreeMap<String, Option<String>>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.annotations.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetadataSection {
    Labels,
    Annotations,
}

impl fmt::Display for MetadataSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataSection::Labels => write!(f, "labels"),
            MetadataSection::Annotations => write!(f, "annotations"),
        }
    }
}

/// One rejected key, with the section it appeared in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub section: MetadataSection,
    pub key: String,
    pub reason: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} key {:?}: {}", self.section, self.key, self.reason)
    }
}

/// Aggregated validation failure. The patch was not applied at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct InvalidMetadata {
    pub violations: Vec<Violation>,
}

impl fmt::Display for InvalidMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid metadata: ")?;
        for (i, v) in self.violations.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

impl From<InvalidMetadata> for AccessError {
    fn from(err: InvalidMetadata) -> Self {
        AccessError::InvalidRequest(err.to_string())
    }
}

/// Key format/reservation policy. Injected at construction so tests can
/// substitute a permissive one.
pub trait KeyValidator: Send + Sync {
    fn validate_key(&self, key: &str) -> Result<(), String>;
}

/// Accepts every key. For tests and trusted system-level callers.
pub struct PermissiveValidator;

impl KeyValidator for PermissiveValidator {
    fn validate_key(&self, _key: &str) -> Result<(), String> {
        Ok(())
    }
}

/// Store-style qualified-name policy: an optional DNS-subdomain prefix
/// separated by `/`, then a name of at most 63 characters that starts and
/// ends alphanumeric with `-`, `_` and `.` allowed inside. Prefixes under a
/// reserved domain are rejected outright; those keys belong to the platform.
pub struct QualifiedKeyValidator {
    reserved_domains: Vec<String>,
}

impl QualifiedKeyValidator {
    pub fn new<I, S>(reserved_domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { reserved_domains: reserved_domains.into_iter().map(Into::into).collect() }
    }

    fn check_name(name: &str) -> Result<(), String> {
        if name.is_empty() {
            return Err("name part must not be empty".into());
        }
        if name.len() > 63 {
            return Err("name part must be at most 63 characters".into());
        }
        let first = name.chars().next().unwrap_or(' ');
        let last = name.chars().last().unwrap_or(' ');
        if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
            return Err("name part must start and end with an alphanumeric character".into());
        }
        if !name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')) {
            return Err("name part contains characters outside [A-Za-z0-9-_.]".into());
        }
        Ok(())
    }

    fn check_prefix(&self, prefix: &str) -> Result<(), String> {
        if prefix.is_empty() || prefix.len() > 253 {
            return Err("prefix must be a DNS subdomain of at most 253 characters".into());
        }
        let label_ok = |label: &str| {
            !label.is_empty()
                && label.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        };
        if !prefix.split('.').all(label_ok) {
            return Err("prefix is not a valid DNS subdomain".into());
        }
        for domain in &self.reserved_domains {
            if prefix == domain || prefix.ends_with(&format!(".{domain}")) {
                return Err(format!("prefix uses the reserved domain {domain:?}"));
            }
        }
        Ok(())
    }
}

impl KeyValidator for QualifiedKeyValidator {
    fn validate_key(&self, key: &str) -> Result<(), String> {
        match key.split_once('/') {
            Some((prefix, name)) => {
                self.check_prefix(prefix)?;
                Self::check_name(name)
            }
            None => Self::check_name(key),
        }
    }
}

/// Applies [`MetadataPatch`] values with all-or-nothing semantics.
pub struct PatchEngine {
    validator: Arc<dyn KeyValidator>,
}

impl PatchEngine {
    pub fn new(validator: Arc<dyn KeyValidator>) -> Self {
        Self { validator }
    }

    /// Validate every changing key in both sections, then apply the whole
    /// patch. On failure the object is untouched and the error names each
    /// offending key and its section.
    pub fn apply<K: ObjectState>(
        &self,
        obj: &mut K,
        patch: &MetadataPatch,
    ) -> Result<(), InvalidMetadata> {
        let mut violations = Vec::new();
        self.check_section(MetadataSection::Labels, obj.labels(), &patch.labels, &mut violations);
        self.check_section(
            MetadataSection::Annotations,
            obj.annotations(),
            &patch.annotations,
            &mut violations,
        );
        if !violations.is_empty() {
            return Err(InvalidMetadata { violations });
        }

        apply_section(obj.labels_mut(), &patch.labels);
        apply_section(obj.annotations_mut(), &patch.annotations);
        Ok(())
    }

    fn check_section(
        &self,
        section: MetadataSection,
        current: Option<&BTreeMap<String, String>>,
        patch: &BTreeMap<String, Option<String>>,
        violations: &mut Vec<Violation>,
    ) {
        for (key, change) in patch {
            let existing = current.and_then(|m| m.get(key));
            let changes = match change {
                Some(value) => existing != Some(value),
                None => existing.is_some(),
            };
            if !changes {
                continue;
            }
            if let Err(reason) = self.validator.validate_key(key) {
                violations.push(Violation { section, key: key.clone(), reason });
            }
        }
    }
}

fn apply_section(target: &mut BTreeMap<String, String>, patch: &BTreeMap<String, Option<String>>) {
    for (key, change) in patch {
        match change {
            Some(value) => {
                target.insert(key.clone(), value.clone());
            }
            None => {
                target.remove(key);
            }
        }
    }
}
