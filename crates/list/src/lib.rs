//! Listing across every namespace the caller is authorized in.
//!
//! The store has no cross-namespace list for namespace-scoped callers, so
//! listing fans out per namespace and merges. Authorization is enforced
//! twice: the resolver pre-computes the namespace set, and the store may
//! still deny an individual namespace if permissions changed in between.
//! Such denials narrow the result instead of failing the whole request.
//!
//! Filtering, ordering and paging all apply to the merged set, never per
//! namespace.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use beluga_client::ResourceClient;
use beluga_core::{AccessResult, Identity, ObjectState};
use beluga_query::{matches_nothing, page_slice, PageInfo, ResourceQuery, SortFields};
use futures::future::join_all;
use metrics::counter;
use tracing::debug;

/// Supplies the namespaces the calling user may read. Implementations
/// typically derive this from role bindings; tests pin a fixed set.
#[async_trait]
pub trait NamespaceResolver: Send + Sync {
    async fn authorized_namespaces(&self, identity: &Identity) -> AccessResult<BTreeSet<String>>;
}

/// A fixed namespace set, for tests and single-tenant deployments.
pub struct FixedNamespaces(pub BTreeSet<String>);

impl FixedNamespaces {
    pub fn of(namespaces: &[&str]) -> Self {
        Self(namespaces.iter().map(|ns| ns.to_string()).collect())
    }
}

#[async_trait]
impl NamespaceResolver for FixedNamespaces {
    async fn authorized_namespaces(&self, _identity: &Identity) -> AccessResult<BTreeSet<String>> {
        Ok(self.0.clone())
    }
}

/// Predicate applied to the merged records before sorting and paging, for
/// criteria the store's selector grammar cannot express.
pub type PostFilter<K> = Box<dyn Fn(&K) -> bool + Send + Sync>;

/// One list request: the structured query plus an optional local filter.
pub struct ListSpec<K> {
    pub query: ResourceQuery,
    pub post_filter: Option<PostFilter<K>>,
}

impl<K> ListSpec<K> {
    pub fn new(query: ResourceQuery) -> Self {
        Self { query, post_filter: None }
    }

    pub fn with_post_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&K) -> bool + Send + Sync + 'static,
    {
        self.post_filter = Some(Box::new(filter));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListResult<K> {
    pub records: Vec<K>,
    pub page_info: PageInfo,
}

impl<K> ListResult<K> {
    fn empty(query: &ResourceQuery) -> Self {
        let (records, page_info) = page_slice(Vec::new(), query.paging());
        Self { records, page_info }
    }
}

/// Fans a list out over the caller's authorized namespaces and merges the
/// results into one globally filtered, sorted and paged set.
pub struct ScopedLister<K, C> {
    client: Arc<C>,
    resolver: Arc<dyn NamespaceResolver>,
    sort_fields: SortFields<K>,
}

impl<K, C> ScopedLister<K, C>
where
    K: ObjectState,
    C: ResourceClient<K>,
{
    pub fn new(
        client: Arc<C>,
        resolver: Arc<dyn NamespaceResolver>,
        sort_fields: SortFields<K>,
    ) -> Self {
        Self { client, resolver, sort_fields }
    }

    pub async fn list(&self, identity: &Identity, spec: ListSpec<K>) -> AccessResult<ListResult<K>> {
        // Translation failures surface before any store call.
        let clauses = spec.query.selector_clauses()?;
        let order = self.sort_fields.resolve(spec.query.order_by.as_deref())?;

        if matches_nothing(&clauses) {
            return Ok(ListResult::empty(&spec.query));
        }

        let namespaces = self.resolver.authorized_namespaces(identity).await?;
        if namespaces.is_empty() {
            debug!(caller = %identity.name, "caller is authorized in no namespace; listing nothing");
            return Ok(ListResult::empty(&spec.query));
        }

        let calls = namespaces.into_iter().map(|ns| {
            let client = Arc::clone(&self.client);
            let clauses = &clauses;
            async move {
                let result = client.list(&ns, clauses).await;
                (ns, result)
            }
        });

        let mut records = Vec::new();
        for (namespace, result) in join_all(calls).await {
            match result {
                Ok(items) => records.extend(items),
                // Permissions may have narrowed since the resolver ran; a
                // denied namespace drops out of the view, it does not fail
                // the request.
                Err(err) if err.is_forbidden() => {
                    counter!("beluga_list_namespaces_skipped_total", 1);
                    debug!(namespace = %namespace, "namespace denied during fan-out; skipping");
                }
                Err(err) => return Err(err),
            }
        }

        if let Some(filter) = &spec.post_filter {
            records.retain(|r| filter(r));
        }
        if let Some(order) = &order {
            order.sort(&mut records);
        }

        let (records, page_info) = page_slice(records, spec.query.paging());
        Ok(ListResult { records, page_info })
    }
}
