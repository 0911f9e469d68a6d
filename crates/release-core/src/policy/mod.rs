//! Policy discovery and resolution.
//!
//! A [`PolicySnapshot`] is fetched once by the caller and threaded through
//! every evaluation that should see the same policies. Nothing here caches
//! across calls.

pub mod merge;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::catalog::Catalog;
use crate::domain::{Policy, ReleaseTargetContext};
use crate::error::Result;

pub use merge::{merge, precedence, EffectivePolicy, Sourced};

/// Policies as read at `fetched_at`.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub policies: Vec<Policy>,
    pub fetched_at: DateTime<Utc>,
}

impl PolicySnapshot {
    pub fn new(policies: Vec<Policy>, fetched_at: DateTime<Utc>) -> Self {
        Self {
            policies,
            fetched_at,
        }
    }

    pub async fn fetch(catalog: &dyn Catalog) -> Result<Self> {
        let policies = catalog.list_policies().await?;
        debug!(count = policies.len(), "fetched policy snapshot");
        Ok(Self::new(policies, Utc::now()))
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        now - self.fetched_at > max_age
    }

    /// Enabled policies covering the release target, in precedence order.
    pub fn applicable(&self, ctx: &ReleaseTargetContext) -> Vec<&Policy> {
        let mut matched: Vec<&Policy> = self
            .policies
            .iter()
            .filter(|p| p.enabled && p.applies_to(ctx))
            .collect();
        matched.sort_by(|a, b| precedence(a, b));
        matched
    }

    /// The effective policy for a release target, if any policy applies.
    pub fn resolve(&self, ctx: &ReleaseTargetContext) -> Option<EffectivePolicy> {
        merge(self.applicable(ctx))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use release_state::{ReleaseTargetRecord, SystemId};

    use super::*;
    use crate::domain::{Deployment, Environment, PolicyTarget, Resource};
    use crate::selector::{Condition, StringOperator};

    fn context(env_name: &str) -> ReleaseTargetContext {
        let system_id = SystemId::new();
        let resource = Resource::new("node-1", "Host").with_metadata("region", "us");
        let environment = Environment {
            id: Default::default(),
            system_id,
            name: env_name.into(),
            metadata: BTreeMap::new(),
            resource_selector: None,
        };
        let deployment = Deployment {
            id: Default::default(),
            system_id,
            name: "api".into(),
            slug: "api".into(),
            metadata: BTreeMap::new(),
            resource_selector: None,
            job_agent_id: None,
            job_agent_config: serde_json::Value::Null,
        };
        let target = ReleaseTargetRecord::new(resource.id, environment.id, deployment.id);
        ReleaseTargetContext::new(target, resource, environment, deployment)
    }

    fn env_named(name: &str) -> PolicyTarget {
        PolicyTarget {
            environment_selector: Some(Condition::Name {
                operator: StringOperator::Equals,
                value: name.into(),
            }),
            ..PolicyTarget::default()
        }
    }

    #[test]
    fn only_matching_policies_apply() {
        let prod = Policy::new("prod", 1)
            .with_target(env_named("prod"))
            .with_concurrency(3);
        let staging = Policy::new("staging", 1)
            .with_target(env_named("staging"))
            .with_concurrency(1);
        let snapshot = PolicySnapshot::new(vec![prod.clone(), staging], Utc::now());

        let ctx = context("prod");
        let applicable = snapshot.applicable(&ctx);
        assert_eq!(applicable.len(), 1);
        assert_eq!(applicable[0].id, prod.id);
        assert_eq!(snapshot.resolve(&ctx).unwrap().concurrency, Some(3));

        assert!(snapshot.resolve(&context("dev")).is_none());
    }

    #[test]
    fn any_target_entry_is_enough() {
        let mut policy = Policy::new("multi", 1);
        policy.targets = vec![env_named("qa"), env_named("prod")];
        let snapshot = PolicySnapshot::new(vec![policy], Utc::now());
        assert!(snapshot.resolve(&context("prod")).is_some());
    }

    #[test]
    fn target_selectors_must_all_match() {
        let policy = Policy::new("eu-prod", 1).with_target(PolicyTarget {
            resource_selector: Some(Condition::metadata_equals("region", "eu")),
            ..env_named("prod")
        });
        let snapshot = PolicySnapshot::new(vec![policy], Utc::now());
        assert!(snapshot.resolve(&context("prod")).is_none());
    }

    #[test]
    fn staleness_is_relative_to_fetch_time() {
        let fetched = Utc::now();
        let snapshot = PolicySnapshot::new(vec![], fetched);
        assert!(!snapshot.is_stale(fetched + Duration::seconds(5), Duration::seconds(30)));
        assert!(snapshot.is_stale(fetched + Duration::seconds(31), Duration::seconds(30)));
    }
}
