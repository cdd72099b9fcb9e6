//! In-memory [`ResourceClient`].
//!
//! Backs tests and local tooling with the same contract as the remote
//! store: selector-filtered listing, per-namespace authorization denial,
//! watch streams that start from the current snapshot, and scripted
//! failures for exercising retry paths.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use beluga_core::{AccessError, AccessResult, ObjectState};
use beluga_query::{matches_all, matches_nothing, SelectorClause};
use tokio::sync::broadcast;

use crate::{ObjectEvent, ResourceClient, WatchEvents};

const EVENT_BUFFER: usize = 256;

struct Inner<K> {
    objects: RwLock<BTreeMap<(String, String), K>>,
    denied: RwLock<BTreeSet<String>>,
    failures: Mutex<VecDeque<AccessError>>,
    events: broadcast::Sender<ObjectEvent<K>>,
}

pub struct MemoryClient<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for MemoryClient<K> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<K: ObjectState> Default for MemoryClient<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ObjectState> MemoryClient<K> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                objects: RwLock::new(BTreeMap::new()),
                denied: RwLock::new(BTreeSet::new()),
                failures: Mutex::new(VecDeque::new()),
                events,
            }),
        }
    }

    /// Make every operation in this namespace fail with `Forbidden`.
    pub fn deny_namespace(&self, namespace: &str) {
        self.inner.denied.write().expect("poisoned").insert(namespace.to_string());
    }

    pub fn allow_namespace(&self, namespace: &str) {
        self.inner.denied.write().expect("poisoned").remove(namespace);
    }

    /// Queue an error to be returned by an upcoming operation, before any
    /// store logic runs. Errors are consumed in order, one per call.
    pub fn fail_next(&self, err: AccessError) {
        self.inner.failures.lock().expect("poisoned").push_back(err);
    }

    /// Seed an object directly, emitting the corresponding watch event.
    pub fn insert(&self, obj: K) {
        let key = object_key(&obj);
        self.inner.objects.write().expect("poisoned").insert(key, obj.clone());
        let _ = self.inner.events.send(ObjectEvent::Applied(obj));
    }

    fn take_failure(&self) -> Option<AccessError> {
        self.inner.failures.lock().expect("poisoned").pop_front()
    }

    fn check_namespace(&self, namespace: &str) -> AccessResult<()> {
        if self.inner.denied.read().expect("poisoned").contains(namespace) {
            return Err(AccessError::Forbidden(format!("namespace {namespace}")));
        }
        Ok(())
    }

    fn gate(&self, namespace: &str) -> AccessResult<()> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.check_namespace(namespace)
    }
}

fn object_key<K: ObjectState>(obj: &K) -> (String, String) {
    (obj.namespace().to_string(), obj.name().to_string())
}

#[async_trait]
impl<K: ObjectState> ResourceClient<K> for MemoryClient<K> {
    async fn get(&self, namespace: &str, name: &str) -> AccessResult<K> {
        self.gate(namespace)?;
        self.inner
            .objects
            .read()
            .expect("poisoned")
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| AccessError::NotFound(format!("{namespace}/{name}")))
    }

    async fn list(&self, namespace: &str, clauses: &[SelectorClause]) -> AccessResult<Vec<K>> {
        self.gate(namespace)?;
        if matches_nothing(clauses) {
            return Ok(Vec::new());
        }
        Ok(self
            .inner
            .objects
            .read()
            .expect("poisoned")
            .values()
            .filter(|obj| obj.namespace() == namespace && matches_all(clauses, obj.labels()))
            .cloned()
            .collect())
    }

    async fn create(&self, obj: &K) -> AccessResult<K> {
        self.gate(obj.namespace())?;
        let key = object_key(obj);
        let mut objects = self.inner.objects.write().expect("poisoned");
        if objects.contains_key(&key) {
            return Err(AccessError::Conflict(format!("{}/{}", obj.namespace(), obj.name())));
        }
        objects.insert(key, obj.clone());
        drop(objects);
        let _ = self.inner.events.send(ObjectEvent::Applied(obj.clone()));
        Ok(obj.clone())
    }

    async fn patch(&self, obj: &K) -> AccessResult<K> {
        self.gate(obj.namespace())?;
        let key = object_key(obj);
        let mut objects = self.inner.objects.write().expect("poisoned");
        if !objects.contains_key(&key) {
            return Err(AccessError::NotFound(format!("{}/{}", obj.namespace(), obj.name())));
        }
        objects.insert(key, obj.clone());
        drop(objects);
        let _ = self.inner.events.send(ObjectEvent::Applied(obj.clone()));
        Ok(obj.clone())
    }

    async fn delete(&self, namespace: &str, name: &str) -> AccessResult<()> {
        self.gate(namespace)?;
        let removed = self
            .inner
            .objects
            .write()
            .expect("poisoned")
            .remove(&(namespace.to_string(), name.to_string()));
        match removed {
            Some(obj) => {
                let _ = self.inner.events.send(ObjectEvent::Deleted(obj));
                Ok(())
            }
            None => Err(AccessError::NotFound(format!("{namespace}/{name}"))),
        }
    }

    async fn delete_all(&self, namespace: &str, clauses: &[SelectorClause]) -> AccessResult<()> {
        self.gate(namespace)?;
        if matches_nothing(clauses) {
            return Ok(());
        }
        let mut removed = Vec::new();
        {
            let mut objects = self.inner.objects.write().expect("poisoned");
            objects.retain(|_, obj| {
                let matched =
                    obj.namespace() == namespace && matches_all(clauses, obj.labels());
                if matched {
                    removed.push(obj.clone());
                }
                !matched
            });
        }
        for obj in removed {
            let _ = self.inner.events.send(ObjectEvent::Deleted(obj));
        }
        Ok(())
    }

    async fn watch(&self, namespace: &str, name: &str) -> AccessResult<WatchEvents<K>> {
        self.gate(namespace)?;
        // Subscribe before snapshotting so no event between the two is
        // lost; a duplicate initial snapshot is harmless to re-evaluating
        // consumers.
        let mut rx = self.inner.events.subscribe();
        let current = self
            .inner
            .objects
            .read()
            .expect("poisoned")
            .get(&(namespace.to_string(), name.to_string()))
            .cloned();
        let namespace = namespace.to_string();
        let name = name.to_string();

        let stream = async_stream::stream! {
            if let Some(obj) = current {
                yield Ok(ObjectEvent::Applied(obj));
            }
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let obj = event.object();
                        if obj.namespace() == namespace && obj.name() == name {
                            yield Ok(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use beluga_core::ObjectRecord;
    use futures::StreamExt;

    use super::*;

    fn client() -> MemoryClient<ObjectRecord> {
        MemoryClient::new()
    }

    #[tokio::test]
    async fn create_then_get_round_trip() {
        let client = client();
        let obj = ObjectRecord::new("ns", "a");
        client.create(&obj).await.unwrap();
        assert_eq!(client.get("ns", "a").await.unwrap(), obj);
        assert!(client.get("ns", "missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn create_of_existing_object_conflicts() {
        let client = client();
        let obj = ObjectRecord::new("ns", "a");
        client.create(&obj).await.unwrap();
        assert!(matches!(client.create(&obj).await, Err(AccessError::Conflict(_))));
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_selector() {
        let client = client();
        client.insert(ObjectRecord::new("ns1", "a").with_label("app", "web"));
        client.insert(ObjectRecord::new("ns1", "b").with_label("app", "worker"));
        client.insert(ObjectRecord::new("ns2", "c").with_label("app", "web"));

        let clauses = vec![SelectorClause::Equals { key: "app".into(), value: "web".into() }];
        let listed = client.list("ns1", &clauses).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "a");
    }

    #[tokio::test]
    async fn nothing_clause_lists_empty_without_failure() {
        let client = client();
        client.insert(ObjectRecord::new("ns", "a"));
        let listed = client.list("ns", &[SelectorClause::Nothing]).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn denied_namespace_is_forbidden() {
        let client = client();
        client.deny_namespace("secret");
        assert!(client.get("secret", "a").await.unwrap_err().is_forbidden());
        client.allow_namespace("secret");
        assert!(client.get("secret", "a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn watch_starts_from_current_snapshot() {
        let client = client();
        client.insert(ObjectRecord::new("ns", "a").with_label("v", "1"));
        let mut events = client.watch("ns", "a").await.unwrap();

        let first = events.next().await.unwrap().unwrap();
        assert!(matches!(first, ObjectEvent::Applied(ref o) if o.labels().unwrap()["v"] == "1"));

        client.patch(&ObjectRecord::new("ns", "a").with_label("v", "2")).await.unwrap();
        let second = events.next().await.unwrap().unwrap();
        assert!(matches!(second, ObjectEvent::Applied(ref o) if o.labels().unwrap()["v"] == "2"));

        client.delete("ns", "a").await.unwrap();
        let third = events.next().await.unwrap().unwrap();
        assert!(matches!(third, ObjectEvent::Deleted(_)));
    }

    #[tokio::test]
    async fn watch_ignores_other_objects() {
        let client = client();
        client.insert(ObjectRecord::new("ns", "a"));
        let mut events = client.watch("ns", "a").await.unwrap();
        let _ = events.next().await; // initial snapshot

        client.insert(ObjectRecord::new("ns", "unrelated"));
        client.patch(&ObjectRecord::new("ns", "a").with_label("seen", "yes")).await.unwrap();

        let next = events.next().await.unwrap().unwrap();
        assert_eq!(next.object().name(), "a");
    }
}
