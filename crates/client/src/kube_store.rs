//! kube-backed [`ResourceClient`].
//!
//! One instance per caller: the wrapped [`kube::Client`] must have been
//! built from the calling user's own credential upstream, so the store's
//! RBAC applies to every operation made through it.

use std::fmt::Debug;
use std::marker::PhantomData;

use async_trait::async_trait;
use beluga_core::{AccessError, AccessResult, ObjectState};
use beluga_query::{matches_nothing, render_selector, SelectorClause};
use futures::TryStreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::watcher::{self, Event};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::{ObjectEvent, ResourceClient, WatchEvents};

pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn new(client: Client) -> Self {
        Self { client, _kind: PhantomData }
    }
}

fn classify(err: kube::Error, what: String) -> AccessError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => AccessError::NotFound(what),
            403 => AccessError::Forbidden(what),
            409 => AccessError::Conflict(what),
            400 | 422 => AccessError::InvalidRequest(format!("{what}: {}", resp.message)),
            _ => AccessError::Internal(format!("{what}: {resp}")),
        },
        other => AccessError::Internal(format!("{what}: {other}")),
    }
}

fn list_params(clauses: &[SelectorClause]) -> ListParams {
    match render_selector(clauses) {
        Some(selector) if !selector.is_empty() => ListParams::default().labels(&selector),
        _ => ListParams::default(),
    }
}

#[async_trait]
impl<K> ResourceClient<K> for KubeStore<K>
where
    K: ObjectState
        + Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Serialize
        + DeserializeOwned
        + Debug,
{
    async fn get(&self, namespace: &str, name: &str) -> AccessResult<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await.map_err(|e| classify(e, format!("{namespace}/{name}")))
    }

    async fn list(&self, namespace: &str, clauses: &[SelectorClause]) -> AccessResult<Vec<K>> {
        if matches_nothing(clauses) {
            return Ok(Vec::new());
        }
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let listed = api
            .list(&list_params(clauses))
            .await
            .map_err(|e| classify(e, format!("list in {namespace}")))?;
        Ok(listed.items)
    }

    async fn create(&self, obj: &K) -> AccessResult<K> {
        let api: Api<K> = Api::namespaced(self.client.clone(), ObjectState::namespace(obj));
        api.create(&PostParams::default(), obj)
            .await
            .map_err(|e| classify(e, format!("create {}", ObjectState::name(obj))))
    }

    async fn patch(&self, obj: &K) -> AccessResult<K> {
        let namespace = ObjectState::namespace(obj);
        let name = ObjectState::name(obj);
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &PatchParams::default(), &Patch::Merge(obj))
            .await
            .map_err(|e| classify(e, format!("{namespace}/{name}")))
    }

    async fn delete(&self, namespace: &str, name: &str) -> AccessResult<()> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| classify(e, format!("{namespace}/{name}")))
    }

    async fn delete_all(&self, namespace: &str, clauses: &[SelectorClause]) -> AccessResult<()> {
        if matches_nothing(clauses) {
            return Ok(());
        }
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.delete_collection(&DeleteParams::default(), &list_params(clauses))
            .await
            .map(|_| ())
            .map_err(|e| classify(e, format!("delete_all in {namespace}")))
    }

    async fn watch(&self, namespace: &str, name: &str) -> AccessResult<WatchEvents<K>> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let config = watcher::Config::default().fields(&format!("metadata.name={name}"));
        let what = format!("{namespace}/{name}");
        debug!(object = %what, "starting single-object watch");

        let stream = async_stream::stream! {
            let events = watcher::watcher(api, config);
            futures::pin_mut!(events);
            loop {
                match events.try_next().await {
                    Ok(Some(Event::Applied(obj))) => yield Ok(ObjectEvent::Applied(obj)),
                    Ok(Some(Event::Deleted(obj))) => yield Ok(ObjectEvent::Deleted(obj)),
                    Ok(Some(Event::Restarted(objs))) => {
                        for obj in objs {
                            yield Ok(ObjectEvent::Applied(obj));
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(AccessError::Internal(format!("watch {what}: {err}")));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
