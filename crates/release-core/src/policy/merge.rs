//! Merging applicable policies into one effective policy.
//!
//! Policies are ordered by descending priority, ties by ascending id. Safety
//! facets accumulate (deny windows, approvals, minimum concurrency); shape
//! facets (version selector, rollout) come from the first policy in that
//! order that defines them.

use release_state::PolicyId;
use serde::Serialize;

use crate::domain::{ApprovalRequirement, DenyWindow, Policy, RolloutConfig};
use crate::selector::Condition;

/// A rule facet together with the policy it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sourced<T> {
    pub policy_id: PolicyId,
    pub rule: T,
}

impl<T> Sourced<T> {
    fn new(policy_id: PolicyId, rule: T) -> Self {
        Self { policy_id, rule }
    }
}

/// The single policy in effect for one release target.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct EffectivePolicy {
    /// Contributing policies in precedence order.
    pub policy_ids: Vec<PolicyId>,
    pub deny_windows: Vec<Sourced<DenyWindow>>,
    pub version_selector: Option<Sourced<Condition>>,
    pub approvals: Vec<Sourced<ApprovalRequirement>>,
    pub concurrency: Option<u32>,
    pub rollout: Option<Sourced<RolloutConfig>>,
}

impl EffectivePolicy {
    pub fn has_approvals(&self) -> bool {
        !self.approvals.is_empty()
    }
}

/// Precedence order: priority descending, then id ascending.
pub fn precedence(a: &Policy, b: &Policy) -> std::cmp::Ordering {
    b.priority.cmp(&a.priority).then(a.id.cmp(&b.id))
}

/// Merge the given policies. Disabled policies are skipped; `None` when no
/// enabled policy remains.
pub fn merge<'a>(policies: impl IntoIterator<Item = &'a Policy>) -> Option<EffectivePolicy> {
    let mut ordered: Vec<&Policy> = policies.into_iter().filter(|p| p.enabled).collect();
    if ordered.is_empty() {
        return None;
    }
    ordered.sort_by(|a, b| precedence(a, b));

    let mut effective = EffectivePolicy::default();
    for policy in ordered {
        effective.policy_ids.push(policy.id);
        effective.deny_windows.extend(
            policy
                .deny_windows
                .iter()
                .cloned()
                .map(|w| Sourced::new(policy.id, w)),
        );
        effective.approvals.extend(
            policy
                .approvals
                .iter()
                .cloned()
                .map(|a| Sourced::new(policy.id, a)),
        );
        if effective.version_selector.is_none() {
            effective.version_selector = policy
                .version_selector
                .clone()
                .map(|s| Sourced::new(policy.id, s));
        }
        if effective.rollout.is_none() {
            effective.rollout = policy.rollout.clone().map(|r| Sourced::new(policy.id, r));
        }
        effective.concurrency = match (effective.concurrency, policy.concurrency) {
            (Some(current), Some(cap)) => Some(current.min(cap)),
            (current, cap) => current.or(cap),
        };
    }
    Some(effective)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RolloutType;

    fn rollout(minutes: i64) -> RolloutConfig {
        RolloutConfig {
            rollout_type: RolloutType::Linear,
            growth_factor: 1.0,
            time_scale_interval_minutes: minutes,
        }
    }

    #[test]
    fn concurrency_takes_the_minimum() {
        let p1 = Policy::new("p1", 10).with_concurrency(5);
        let p2 = Policy::new("p2", 5).with_concurrency(2);
        let p3 = Policy::new("p3", 1);
        let merged = merge([&p1, &p2, &p3]).unwrap();
        assert_eq!(merged.concurrency, Some(2));
    }

    #[test]
    fn version_selector_from_highest_priority_only() {
        let s1 = Condition::metadata_equals("channel", "stable");
        let s2 = Condition::metadata_equals("channel", "beta");
        let p1 = Policy::new("p1", 10).with_version_selector(s1.clone());
        let p2 = Policy::new("p2", 5).with_version_selector(s2);
        let merged = merge([&p2, &p1]).unwrap();
        let selector = merged.version_selector.unwrap();
        assert_eq!(selector.rule, s1);
        assert_eq!(selector.policy_id, p1.id);
    }

    #[test]
    fn approvals_and_deny_windows_are_unioned() {
        let p1 = Policy::new("p1", 10).with_approval(ApprovalRequirement::Any { required: 1 });
        let p2 = Policy::new("p2", 5)
            .with_approval(ApprovalRequirement::User {
                user_id: "alice".into(),
            })
            .with_approval(ApprovalRequirement::Role {
                role: "sre".into(),
                required: 2,
            });
        let merged = merge([&p1, &p2]).unwrap();
        assert_eq!(merged.approvals.len(), 3);
        assert_eq!(merged.approvals[0].policy_id, p1.id);
        assert!(merged.approvals[1..].iter().all(|a| a.policy_id == p2.id));
    }

    #[test]
    fn equal_priority_override_breaks_ties_by_id() {
        let mut a = Policy::new("a", 7).with_rollout(rollout(30));
        let mut b = Policy::new("b", 7).with_rollout(rollout(90));
        // Force a known id order.
        if a.id > b.id {
            std::mem::swap(&mut a.id, &mut b.id);
        }
        let forward = merge([&a, &b]).unwrap();
        let backward = merge([&b, &a]).unwrap();
        assert_eq!(forward.rollout, backward.rollout);
        assert_eq!(forward.rollout.unwrap().rule.time_scale_interval_minutes, 30);
    }

    #[test]
    fn disabled_policies_are_ignored() {
        let mut p = Policy::new("off", 100).with_concurrency(1);
        p.enabled = false;
        assert!(merge([&p]).is_none());
        let on = Policy::new("on", 1);
        let merged = merge([&p, &on]).unwrap();
        assert_eq!(merged.concurrency, None);
        assert_eq!(merged.policy_ids, vec![on.id]);
    }
}
