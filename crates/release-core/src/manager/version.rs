//! Version release manager: picks the deployment version a release target
//! should run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use release_state::{
    DeploymentVersionId, ReleaseRecord, ReleaseStore, ReleaseTargetId, ReleaseTargetStore,
};
use tracing::{debug, instrument};

use crate::catalog::Catalog;
use crate::domain::{newest_first, ApprovalRecord, DeploymentVersion, ReleaseTargetContext};
use crate::error::{ReleaseError, Result};
use crate::policy::EffectivePolicy;
use crate::rollout::{rollout_start, rollout_status, RolloutSlot, RolloutStatus};
use crate::rules::{evaluate, version_rules, RejectionReasons, VersionRuleInputs};

/// Result of one version evaluation.
#[derive(Debug, Clone)]
pub struct VersionDecision {
    pub chosen: Option<DeploymentVersion>,
    pub rejection_reasons: RejectionReasons<DeploymentVersionId>,
    pub blocked_by: Option<String>,
    /// Whether candidates came from a desired-release pin.
    pub pinned: bool,
}

pub struct VersionManager<'a> {
    catalog: &'a dyn Catalog,
    targets: &'a dyn ReleaseTargetStore,
    releases: &'a dyn ReleaseStore,
    candidate_limit: usize,
}

impl<'a> VersionManager<'a> {
    pub fn new(
        catalog: &'a dyn Catalog,
        targets: &'a dyn ReleaseTargetStore,
        releases: &'a dyn ReleaseStore,
        candidate_limit: usize,
    ) -> Self {
        Self {
            catalog,
            targets,
            releases,
            candidate_limit,
        }
    }

    /// Choose a version for the release target as of `now`.
    #[instrument(skip_all, fields(release_target_id = %ctx.target.id))]
    pub async fn evaluate(
        &self,
        ctx: &ReleaseTargetContext,
        policy: Option<&EffectivePolicy>,
        pin: Option<&ReleaseRecord>,
        now: DateTime<Utc>,
    ) -> Result<VersionDecision> {
        let candidates = match pin {
            Some(release) => vec![self.pinned_version(release).await?],
            None => self.candidates(ctx, now).await?,
        };
        debug!(count = candidates.len(), pinned = pin.is_some(), "version candidates");

        let inputs = match policy {
            Some(policy) => self.rule_inputs(ctx, policy, &candidates, now).await?,
            None => VersionRuleInputs {
                now,
                ..Default::default()
            },
        };
        let default_policy = EffectivePolicy::default();
        let rules = version_rules(policy.unwrap_or(&default_policy), inputs);
        let result = evaluate(&rules, &candidates);

        Ok(VersionDecision {
            chosen: result.chosen.cloned(),
            rejection_reasons: result.rejection_reasons,
            blocked_by: result.blocked_by,
            pinned: pin.is_some(),
        })
    }

    async fn pinned_version(&self, release: &ReleaseRecord) -> Result<DeploymentVersion> {
        let version_release = self
            .releases
            .get_version_release(&release.version_release_id)
            .await?
            .ok_or_else(|| ReleaseError::not_found("version release", release.version_release_id))?;
        self.catalog
            .get_version(&version_release.version_id)
            .await?
            .ok_or_else(|| ReleaseError::not_found("deployment version", version_release.version_id))
    }

    /// Ready versions inside the recency window, newest first.
    ///
    /// The deployed version is read before the candidate list so a version
    /// inserted in between can only widen the window, never make an older
    /// version eligible.
    async fn candidates(
        &self,
        ctx: &ReleaseTargetContext,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeploymentVersion>> {
        let deployed_id = self.releases.latest_deployed_version(&ctx.target.id).await?;
        let mut versions = self.catalog.list_versions(&ctx.deployment.id).await?;

        let floor = match deployed_id {
            Some(id) => match versions.iter().find(|v| v.id == id) {
                Some(v) => Some(v.created_at),
                None => self.catalog.get_version(&id).await?.map(|v| v.created_at),
            },
            None => None,
        };

        versions.retain(|v| {
            v.is_ready() && v.created_at <= now && floor.map_or(true, |f| v.created_at >= f)
        });
        newest_first(&mut versions);
        versions.truncate(self.candidate_limit);
        Ok(versions)
    }

    async fn cohort(&self, ctx: &ReleaseTargetContext) -> Result<Vec<ReleaseTargetId>> {
        let cohort = self
            .targets
            .targets_for_cohort(&ctx.deployment.id, &ctx.environment.id)
            .await?;
        Ok(cohort.into_iter().map(|t| t.id).collect())
    }

    /// Approval records of one version under every policy with approval
    /// requirements.
    async fn approvals(
        &self,
        policy: &EffectivePolicy,
        version_id: DeploymentVersionId,
    ) -> Result<Vec<ApprovalRecord>> {
        let mut policy_ids: Vec<_> = policy.approvals.iter().map(|a| a.policy_id).collect();
        policy_ids.sort();
        policy_ids.dedup();
        let per_policy = try_join_all(
            policy_ids
                .iter()
                .map(|policy_id| self.catalog.approvals_for(&version_id, policy_id)),
        )
        .await?;
        Ok(per_policy.into_iter().flatten().collect())
    }

    async fn rule_inputs(
        &self,
        ctx: &ReleaseTargetContext,
        policy: &EffectivePolicy,
        candidates: &[DeploymentVersion],
        now: DateTime<Utc>,
    ) -> Result<VersionRuleInputs> {
        let mut approvals = HashMap::new();
        if policy.has_approvals() {
            let records = try_join_all(candidates.iter().map(|v| self.approvals(policy, v.id))).await?;
            approvals.extend(candidates.iter().map(|v| v.id).zip(records));
        }

        let needs_cohort = policy.concurrency.is_some() || policy.rollout.is_some();
        let cohort = if needs_cohort {
            self.cohort(ctx).await?
        } else {
            Vec::new()
        };

        let cohort_active_jobs = if policy.concurrency.is_some() {
            self.releases.active_jobs(&cohort).await?.len()
        } else {
            0
        };

        let mut rollout_times = HashMap::new();
        if let Some(rollout) = &policy.rollout {
            for version in candidates {
                let records = approvals.get(&version.id).map(Vec::as_slice).unwrap_or(&[]);
                let start = rollout_start(version, Some(policy), records);
                let slot = rollout_status(&rollout.rule, &ctx.target.id, version, &cohort, start)
                    .map_or(RolloutSlot::NotInCohort, |s| s.slot());
                rollout_times.insert(version.id, slot);
            }
        }

        Ok(VersionRuleInputs {
            now,
            cohort_active_jobs,
            approvals,
            rollout_times,
        })
    }

    /// Where the release target sits in `version`'s rollout. `None` when no
    /// rollout applies to the target.
    pub async fn rollout_status(
        &self,
        ctx: &ReleaseTargetContext,
        policy: Option<&EffectivePolicy>,
        version: &DeploymentVersion,
    ) -> Result<Option<RolloutStatus>> {
        let Some(policy) = policy else {
            return Ok(None);
        };
        let Some(rollout) = &policy.rollout else {
            return Ok(None);
        };
        let records = if policy.has_approvals() {
            self.approvals(policy, version.id).await?
        } else {
            Vec::new()
        };
        let cohort = self.cohort(ctx).await?;
        let start = rollout_start(version, Some(policy), &records);
        Ok(rollout_status(&rollout.rule, &ctx.target.id, version, &cohort, start))
    }
}
