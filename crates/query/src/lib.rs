//! Query translation: structured list filters into the store's selector,
//! ordering and paging primitives. Pure logic, no I/O.
//!
//! The one invariant worth calling out: an "in" filter with an empty value
//! set translates to [`SelectorClause::Nothing`]. Omitting the filter
//! instead would silently widen it to "match all".

#![forbid(unsafe_code)]

pub mod page;
mod parse;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use beluga_core::AccessError;
use serde::{Deserialize, Serialize};

pub use page::{page_slice, PageInfo, Pagination};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("invalid selector: {0}")]
    InvalidSelector(String),
    #[error("unsupported field for ordering: {0:?}")]
    UnsupportedOrderField(String),
}

impl From<QueryError> for AccessError {
    fn from(err: QueryError) -> Self {
        AccessError::InvalidRequest(err.to_string())
    }
}

/// One predicate over an object's labels, in the store's selector algebra.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorClause {
    Equals { key: String, value: String },
    NotEquals { key: String, value: String },
    In { key: String, values: Vec<String> },
    NotIn { key: String, values: Vec<String> },
    Exists { key: String },
    NotExists { key: String },
    /// Matches no object at all. Cannot be rendered into the store grammar;
    /// clients short-circuit to an empty result instead.
    Nothing,
}

impl SelectorClause {
    /// Local evaluation against a label map, matching the store's selector
    /// semantics: negative clauses also match objects missing the key.
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let get = |key: &str| labels.and_then(|m| m.get(key));
        match self {
            SelectorClause::Equals { key, value } => get(key) == Some(value),
            SelectorClause::NotEquals { key, value } => get(key) != Some(value),
            SelectorClause::In { key, values } => {
                get(key).is_some_and(|v| values.contains(v))
            }
            SelectorClause::NotIn { key, values } => {
                !get(key).is_some_and(|v| values.contains(v))
            }
            SelectorClause::Exists { key } => get(key).is_some(),
            SelectorClause::NotExists { key } => get(key).is_none(),
            SelectorClause::Nothing => false,
        }
    }
}

/// True when every clause matches; the empty clause set matches everything.
pub fn matches_all(clauses: &[SelectorClause], labels: Option<&BTreeMap<String, String>>) -> bool {
    clauses.iter().all(|c| c.matches(labels))
}

pub fn matches_nothing(clauses: &[SelectorClause]) -> bool {
    clauses.iter().any(|c| matches!(c, SelectorClause::Nothing))
}

/// Render clauses into the store's selector string. Returns `None` when the
/// set contains [`SelectorClause::Nothing`]: the grammar cannot express it,
/// and the caller must skip the store round-trip entirely.
pub fn render_selector(clauses: &[SelectorClause]) -> Option<String> {
    if matches_nothing(clauses) {
        return None;
    }
    let parts: Vec<String> = clauses
        .iter()
        .map(|c| match c {
            SelectorClause::Equals { key, value } => format!("{key}={value}"),
            SelectorClause::NotEquals { key, value } => format!("{key}!={value}"),
            SelectorClause::In { key, values } => format!("{key} in ({})", values.join(",")),
            SelectorClause::NotIn { key, values } => {
                format!("{key} notin ({})", values.join(","))
            }
            SelectorClause::Exists { key } => key.clone(),
            SelectorClause::NotExists { key } => format!("!{key}"),
            SelectorClause::Nothing => unreachable!("checked above"),
        })
        .collect();
    Some(parts.join(","))
}

/// Structured list request. One instance per logical request, immutable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceQuery {
    /// Field equality filters: label key -> required value.
    pub equals: BTreeMap<String, String>,
    /// Set filters: label key -> allowed values. An empty set matches
    /// nothing, by contract.
    pub in_sets: BTreeMap<String, Vec<String>>,
    /// Existence filters: label key must be present, value unconstrained.
    pub exists: BTreeSet<String>,
    /// Free-form selector in the store grammar; parsed, never passed
    /// through verbatim.
    pub raw_selector: Option<String>,
    /// Sort field, `-`-prefixed for descending.
    pub order_by: Option<String>,
    /// Page request; ignored unless both page and per_page are non-zero.
    pub paging: Option<Pagination>,
}

impl ResourceQuery {
    /// Translate every filter into selector clauses. Fails atomically: a
    /// bad raw selector yields an error and no partial clause set.
    pub fn selector_clauses(&self) -> Result<Vec<SelectorClause>, QueryError> {
        let mut clauses = Vec::new();
        for (key, value) in &self.equals {
            clauses.push(SelectorClause::Equals { key: key.clone(), value: value.clone() });
        }
        for (key, values) in &self.in_sets {
            if values.is_empty() {
                clauses.push(SelectorClause::Nothing);
            } else {
                clauses.push(SelectorClause::In { key: key.clone(), values: values.clone() });
            }
        }
        for key in &self.exists {
            clauses.push(SelectorClause::Exists { key: key.clone() });
        }
        if let Some(raw) = &self.raw_selector {
            clauses.extend(parse::parse_selector(raw)?);
        }
        Ok(clauses)
    }

    /// Effective paging: a zero page or page size means "no paging", a
    /// deliberate default rather than an error.
    pub fn paging(&self) -> Option<Pagination> {
        self.paging.filter(|p| p.page > 0 && p.per_page > 0)
    }
}

pub type SortKeyFn<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;

/// A resolved ordering: validated field name plus its key extractor.
#[derive(Clone)]
pub struct OrderBy<K> {
    pub field: String,
    pub descending: bool,
    key: SortKeyFn<K>,
}

impl<K> std::fmt::Debug for OrderBy<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBy")
            .field("field", &self.field)
            .field("descending", &self.descending)
            .finish_non_exhaustive()
    }
}

impl<K> PartialEq for OrderBy<K> {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field && self.descending == other.descending
    }
}

impl<K> OrderBy<K> {
    pub fn sort(&self, items: &mut [K]) {
        items.sort_by(|a, b| {
            let ord = (self.key)(a).cmp(&(self.key)(b));
            if self.descending {
                ord.reverse()
            } else {
                ord
            }
        });
    }
}

/// The sortable fields a resource adapter exposes, mapping API field names
/// to key extractors.
pub struct SortFields<K> {
    fields: BTreeMap<String, SortKeyFn<K>>,
}

impl<K> Default for SortFields<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> SortFields<K> {
    pub fn new() -> Self {
        Self { fields: BTreeMap::new() }
    }

    pub fn with<F>(mut self, field: impl Into<String>, key: F) -> Self
    where
        F: Fn(&K) -> String + Send + Sync + 'static,
    {
        self.fields.insert(field.into(), Arc::new(key));
        self
    }

    /// Resolve an `order_by` value: `-` prefix flips to descending, an
    /// empty or absent field applies no ordering, and an unmapped field is
    /// a translation failure.
    pub fn resolve(&self, order_by: Option<&str>) -> Result<Option<OrderBy<K>>, QueryError> {
        let Some(raw) = order_by else {
            return Ok(None);
        };
        let (descending, field) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        if field.is_empty() {
            return Ok(None);
        }
        let key = self
            .fields
            .get(field)
            .ok_or_else(|| QueryError::UnsupportedOrderField(field.to_string()))?;
        Ok(Some(OrderBy { field: field.to_string(), descending, key: Arc::clone(key) }))
    }
}

impl SortFields<beluga_core::ObjectRecord> {
    /// The orderings every record-shaped resource supports.
    pub fn common() -> Self {
        Self::new()
            .with("name", |r: &beluga_core::ObjectRecord| r.name.clone())
            .with("created_at", beluga_core::ObjectRecord::created_at_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn equality_filter_translates_to_equals_clause() {
        let mut query = ResourceQuery::default();
        query.equals.insert("app".into(), "web".into());
        let clauses = query.selector_clauses().unwrap();
        assert_eq!(
            clauses,
            vec![SelectorClause::Equals { key: "app".into(), value: "web".into() }]
        );
    }

    #[test]
    fn non_empty_set_filter_matches_only_listed_values() {
        let mut query = ResourceQuery::default();
        query.in_sets.insert("guid".into(), vec!["a".into(), "b".into()]);
        let clauses = query.selector_clauses().unwrap();

        assert!(matches_all(&clauses, Some(&labels(&[("guid", "a")]))));
        assert!(matches_all(&clauses, Some(&labels(&[("guid", "b")]))));
        assert!(!matches_all(&clauses, Some(&labels(&[("guid", "c")]))));
        assert!(!matches_all(&clauses, None));
    }

    #[test]
    fn empty_set_filter_matches_nothing_not_everything() {
        let mut query = ResourceQuery::default();
        query.in_sets.insert("guid".into(), vec![]);
        let clauses = query.selector_clauses().unwrap();

        assert!(matches_nothing(&clauses));
        assert!(!matches_all(&clauses, Some(&labels(&[("guid", "a")]))));
        assert!(render_selector(&clauses).is_none());
    }

    #[test]
    fn exists_filter_ignores_value() {
        let mut query = ResourceQuery::default();
        query.exists.insert("owner".into());
        let clauses = query.selector_clauses().unwrap();
        assert!(matches_all(&clauses, Some(&labels(&[("owner", "anything")]))));
        assert!(!matches_all(&clauses, Some(&labels(&[("other", "x")]))));
    }

    #[test]
    fn invalid_raw_selector_fails_translation() {
        let query = ResourceQuery {
            raw_selector: Some("this is !! not valid".into()),
            ..Default::default()
        };
        assert!(matches!(
            query.selector_clauses(),
            Err(QueryError::InvalidSelector(_))
        ));
    }

    #[test]
    fn negative_clauses_match_missing_keys() {
        let ne = SelectorClause::NotEquals { key: "env".into(), value: "prod".into() };
        assert!(ne.matches(None));
        assert!(ne.matches(Some(&labels(&[("env", "dev")]))));
        assert!(!ne.matches(Some(&labels(&[("env", "prod")]))));

        let ni = SelectorClause::NotIn { key: "env".into(), values: vec!["prod".into()] };
        assert!(ni.matches(None));
        assert!(!ni.matches(Some(&labels(&[("env", "prod")]))));
    }

    #[test]
    fn render_round_trips_through_parser() {
        let clauses = vec![
            SelectorClause::Equals { key: "app".into(), value: "web".into() },
            SelectorClause::In { key: "env".into(), values: vec!["dev".into(), "prod".into()] },
            SelectorClause::NotExists { key: "legacy".into() },
        ];
        let rendered = render_selector(&clauses).unwrap();
        let query = ResourceQuery { raw_selector: Some(rendered), ..Default::default() };
        assert_eq!(query.selector_clauses().unwrap(), clauses);
    }

    #[test]
    fn ordering_resolves_descending_prefix() {
        let fields = SortFields::common();
        let order = fields.resolve(Some("-name")).unwrap().unwrap();
        assert_eq!(order.field, "name");
        assert!(order.descending);

        let mut records = vec![
            beluga_core::ObjectRecord::new("ns", "a"),
            beluga_core::ObjectRecord::new("ns", "c"),
            beluga_core::ObjectRecord::new("ns", "b"),
        ];
        order.sort(&mut records);
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[test]
    fn ordering_rejects_unknown_field() {
        let fields = SortFields::common();
        assert_eq!(
            fields.resolve(Some("updated_at")),
            Err(QueryError::UnsupportedOrderField("updated_at".into()))
        );
    }

    #[test]
    fn empty_order_field_means_no_ordering() {
        let fields = SortFields::common();
        assert!(fields.resolve(None).unwrap().is_none());
        assert!(fields.resolve(Some("")).unwrap().is_none());
        assert!(fields.resolve(Some("-")).unwrap().is_none());
    }

    #[test]
    fn zero_valued_paging_is_disabled() {
        let query = ResourceQuery {
            paging: Some(Pagination { page: 0, per_page: 50 }),
            ..Default::default()
        };
        assert!(query.paging().is_none());

        let query = ResourceQuery {
            paging: Some(Pagination { page: 2, per_page: 0 }),
            ..Default::default()
        };
        assert!(query.paging().is_none());

        let query = ResourceQuery {
            paging: Some(Pagination { page: 2, per_page: 5 }),
            ..Default::default()
        };
        assert_eq!(query.paging(), Some(Pagination { page: 2, per_page: 5 }));
    }
}
