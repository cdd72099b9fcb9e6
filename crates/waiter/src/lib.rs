//! Waiting for an eventually-consistent object to reach a state.
//!
//! Reconciliation lags writes, so "create then read" often observes stale
//! state. The awaiter watches a single object and resolves when a caller
//! predicate accepts a snapshot, the object is deleted, or a deadline
//! passes. Deletion and timeout are distinct failures: the first means the
//! waited-for state can never arrive, the second that it has not arrived
//! yet.

#![forbid(unsafe_code)]

use std::time::Duration;

use beluga_client::{ObjectEvent, ResourceClient};
use beluga_core::{AccessError, AccessResult, ObjectState};
use futures::StreamExt;
use tracing::debug;

pub mod predicates;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Watches one object until a predicate accepts it.
#[derive(Debug, Clone, Copy)]
pub struct ConditionAwaiter {
    timeout: Duration,
}

impl Default for ConditionAwaiter {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT }
    }
}

impl ConditionAwaiter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Resolve once `predicate` accepts an observed snapshot of the object.
    ///
    /// The predicate runs against every snapshot in arrival order and must
    /// judge each one on its own; intermediate states are visible but never
    /// accumulated. Returns the accepted snapshot, `ObjectGone` if the
    /// object is deleted first, or `Timeout` after the deadline. A deletion
    /// already observed wins over a simultaneously expired deadline.
    pub async fn await_state<K, C, P>(
        &self,
        client: &C,
        namespace: &str,
        name: &str,
        mut predicate: P,
    ) -> AccessResult<K>
    where
        K: ObjectState,
        C: ResourceClient<K>,
        P: FnMut(&K) -> bool + Send,
    {
        let what = format!("{namespace}/{name}");
        let mut events = client.watch(namespace, name).await?;

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                // Drain pending events before the deadline branch so a
                // deletion that already happened surfaces as ObjectGone
                // rather than Timeout.
                biased;
                event = events.next() => match event {
                    Some(Ok(ObjectEvent::Applied(obj))) => {
                        if predicate(&obj) {
                            debug!(object = %what, "awaited state reached");
                            return Ok(obj);
                        }
                    }
                    Some(Ok(ObjectEvent::Deleted(_))) => {
                        return Err(AccessError::ObjectGone(what));
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        return Err(AccessError::Internal(format!(
                            "watch on {what} ended unexpectedly"
                        )));
                    }
                },
                _ = &mut deadline => {
                    debug!(object = %what, timeout = ?self.timeout, "gave up waiting");
                    return Err(AccessError::Timeout(what));
                }
            }
        }
    }

    /// Wait for a named condition to become `True`.
    pub async fn await_condition<K, C>(
        &self,
        client: &C,
        namespace: &str,
        name: &str,
        condition_type: &str,
    ) -> AccessResult<K>
    where
        K: ObjectState,
        C: ResourceClient<K>,
    {
        self.await_state(client, namespace, name, predicates::condition_true(condition_type))
            .await
    }
}
