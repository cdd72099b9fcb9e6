//! Common acceptance predicates for [`ConditionAwaiter::await_state`].
//!
//! [`ConditionAwaiter::await_state`]: crate::ConditionAwaiter::await_state

use beluga_core::conditions;
use beluga_core::ObjectState;

/// Accepts a snapshot once the named condition is `True`.
pub fn condition_true<K: ObjectState>(condition_type: &str) -> impl FnMut(&K) -> bool + Send {
    let condition_type = condition_type.to_string();
    move |obj: &K| conditions::is_true(obj.conditions(), &condition_type)
}

/// Accepts a snapshot once the reconciler has caught up with the desired
/// state: the named condition is `True` and its observed generation matches
/// the object's. Guards against accepting a stale `True` left over from a
/// previous generation.
pub fn converged<K: ObjectState>(condition_type: &str) -> impl FnMut(&K) -> bool + Send {
    let condition_type = condition_type.to_string();
    move |obj: &K| {
        conditions::find(obj.conditions(), &condition_type).is_some_and(|c| {
            c.status == conditions::ConditionStatus::True
                && obj.generation().map_or(true, |g| g == c.observed_generation)
        })
    }
}

#[cfg(test)]
mod tests {
    use beluga_core::conditions::{Condition, ConditionStatus};
    use beluga_core::ObjectRecord;

    use super::*;

    #[test]
    fn condition_true_requires_the_named_type() {
        let mut accepts = condition_true::<ObjectRecord>("Ready");
        let obj = ObjectRecord::new("ns", "a")
            .with_condition(Condition::new("Initialized", ConditionStatus::True));
        assert!(!accepts(&obj));

        let obj = obj.with_condition(Condition::new("Ready", ConditionStatus::True));
        assert!(accepts(&obj));
    }

    #[test]
    fn converged_rejects_stale_observed_generation() {
        let mut accepts = converged::<ObjectRecord>("Ready");

        let mut stale = ObjectRecord::new("ns", "a")
            .with_condition(Condition::new("Ready", ConditionStatus::True).with_observed_generation(1));
        stale.generation = Some(2);
        assert!(!accepts(&stale));

        let mut caught_up = ObjectRecord::new("ns", "a")
            .with_condition(Condition::new("Ready", ConditionStatus::True).with_observed_generation(2));
        caught_up.generation = Some(2);
        assert!(accepts(&caught_up));
    }
}
