//! Store access: the remote-store client contract, its kube-backed and
//! in-memory implementations, and the retrying wrapper that absorbs
//! authorization-propagation lag.
//!
//! Client instances are per-caller. Whoever builds one holds the calling
//! user's credential; nothing here takes an identity parameter.

#![forbid(unsafe_code)]

pub mod kube_store;
pub mod memory;

pub use kube_store::KubeStore;
pub use memory::MemoryClient;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use beluga_core::{AccessResult, ObjectState};
use beluga_query::SelectorClause;
use futures::Stream;

/// One observed change to a watched object.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectEvent<K> {
    /// Created or updated; carries the full observed snapshot.
    Applied(K),
    Deleted(K),
}

impl<K> ObjectEvent<K> {
    pub fn object(&self) -> &K {
        match self {
            ObjectEvent::Applied(obj) | ObjectEvent::Deleted(obj) => obj,
        }
    }
}

pub type WatchEvents<K> = Pin<Box<dyn Stream<Item = AccessResult<ObjectEvent<K>>> + Send>>;

/// The minimal remote-store contract every per-resource adapter builds on.
///
/// Errors follow the [`beluga_core::AccessError`] taxonomy. A clause set
/// containing [`SelectorClause::Nothing`] must yield an empty list without
/// a store round-trip; the store cannot express it.
#[async_trait]
pub trait ResourceClient<K>: Send + Sync
where
    K: ObjectState,
{
    async fn get(&self, namespace: &str, name: &str) -> AccessResult<K>;

    async fn list(&self, namespace: &str, clauses: &[SelectorClause]) -> AccessResult<Vec<K>>;

    async fn create(&self, obj: &K) -> AccessResult<K>;

    /// Persist the caller's already-mutated desired state as a merge patch
    /// and return the store's view of the result.
    async fn patch(&self, obj: &K) -> AccessResult<K>;

    async fn delete(&self, namespace: &str, name: &str) -> AccessResult<()>;

    async fn delete_all(&self, namespace: &str, clauses: &[SelectorClause]) -> AccessResult<()>;

    /// Change notifications for a single object, starting from its current
    /// state. The stream ends only on watch failure; drop it to unsubscribe.
    async fn watch(&self, namespace: &str, name: &str) -> AccessResult<WatchEvents<K>>;
}

/// Retry pacing for the authorization-retrying wrapper. Immutable, shared
/// read-only across all concurrent calls.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: u32) -> Self {
        Self { max_attempts: max_attempts.max(1), initial_delay, multiplier }
    }

    /// Zero-delay policy for tests and latency-critical callers.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, 1)
    }

    /// Delay after the given 1-based attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay * self.multiplier.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for BackoffPolicy {
    // Roughly 1.5s worst case: long enough to ride out role-binding
    // propagation, short next to the awaiter's timeout.
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100), 2)
    }
}

/// Decorator that retries the one transient error class: authorization
/// denial during permission propagation. Everything else, success or
/// failure, returns after a single underlying call, and an exhausted
/// denial is returned unchanged so callers can still classify it.
pub struct RetryingClient<C> {
    inner: C,
    policy: BackoffPolicy,
}

impl<C> RetryingClient<C> {
    pub fn new(inner: C, policy: BackoffPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

macro_rules! with_auth_retry {
    ($self:ident, $call:expr) => {{
        let mut attempt = 1u32;
        loop {
            match $call.await {
                Err(err) if err.is_forbidden() && attempt < $self.policy.max_attempts => {
                    metrics::counter!("beluga_auth_retries_total", 1);
                    tracing::debug!(attempt, "authorization denied; backing off before retry");
                    tokio::time::sleep($self.policy.delay_after(attempt)).await;
                    attempt += 1;
                }
                other => break other,
            }
        }
    }};
}

#[async_trait]
impl<K, C> ResourceClient<K> for RetryingClient<C>
where
    K: ObjectState,
    C: ResourceClient<K>,
{
    async fn get(&self, namespace: &str, name: &str) -> AccessResult<K> {
        with_auth_retry!(self, self.inner.get(namespace, name))
    }

    async fn list(&self, namespace: &str, clauses: &[SelectorClause]) -> AccessResult<Vec<K>> {
        with_auth_retry!(self, self.inner.list(namespace, clauses))
    }

    async fn create(&self, obj: &K) -> AccessResult<K> {
        with_auth_retry!(self, self.inner.create(obj))
    }

    async fn patch(&self, obj: &K) -> AccessResult<K> {
        with_auth_retry!(self, self.inner.patch(obj))
    }

    async fn delete(&self, namespace: &str, name: &str) -> AccessResult<()> {
        with_auth_retry!(self, self.inner.delete(namespace, name))
    }

    async fn delete_all(&self, namespace: &str, clauses: &[SelectorClause]) -> AccessResult<()> {
        with_auth_retry!(self, self.inner.delete_all(namespace, clauses))
    }

    async fn watch(&self, namespace: &str, name: &str) -> AccessResult<WatchEvents<K>> {
        with_auth_retry!(self, self.inner.watch(namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delays_grow_by_multiplier() {
        let policy = BackoffPolicy::new(4, Duration::from_millis(100), 2);
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn immediate_policy_has_no_delay() {
        let policy = BackoffPolicy::immediate(3);
        assert_eq!(policy.delay_after(1), Duration::ZERO);
        assert_eq!(policy.delay_after(2), Duration::ZERO);
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(BackoffPolicy::immediate(0).max_attempts, 1);
    }
}
