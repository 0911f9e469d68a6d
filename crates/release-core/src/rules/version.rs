//! Rules over deployment version candidates.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use release_state::DeploymentVersionId;

use super::{ApprovalFilter, Candidate, DenyWindowGate, Filtered, Gate, Rule};
use crate::domain::{ApprovalRecord, DeploymentVersion};
use crate::policy::{EffectivePolicy, Sourced};
use crate::rollout::RolloutSlot;
use crate::selector::Condition;

impl Candidate for DeploymentVersion {
    type Id = DeploymentVersionId;

    fn candidate_id(&self) -> DeploymentVersionId {
        self.id
    }
}

/// Blocks every candidate once the cohort has `cap` jobs in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyGate {
    pub cap: u32,
    /// Active jobs across the deployment x environment cohort.
    pub active: usize,
}

impl ConcurrencyGate {
    pub fn check(&self) -> Gate {
        if self.active >= self.cap as usize {
            Gate::Blocked(format!(
                "concurrency limit reached ({} of {} jobs in flight)",
                self.active, self.cap
            ))
        } else {
            Gate::Open
        }
    }
}

#[derive(Debug, Clone)]
pub struct VersionSelectorFilter {
    pub condition: Sourced<Condition>,
}

impl VersionSelectorFilter {
    fn reject(&self, version: &DeploymentVersion) -> Option<String> {
        (!self.condition.rule.matches(version)).then(|| {
            format!(
                "version '{}' does not match version selector (policy {})",
                version.tag, self.condition.policy_id
            )
        })
    }
}

/// Admits a version once this target's slot in its rollout has opened.
#[derive(Debug, Clone)]
pub struct RolloutFilter {
    pub now: DateTime<Utc>,
    /// This target's slot per version. Versions without an entry are
    /// treated as not yet started.
    pub rollout_times: HashMap<DeploymentVersionId, RolloutSlot>,
}

impl RolloutFilter {
    fn reject(&self, version: &DeploymentVersion) -> Option<String> {
        let slot = self
            .rollout_times
            .get(&version.id)
            .copied()
            .unwrap_or(RolloutSlot::AwaitingApproval);
        match slot {
            RolloutSlot::AwaitingApproval => {
                Some("rollout not started (awaiting approval)".to_string())
            }
            RolloutSlot::NotInCohort => {
                Some("release target not yet part of its rollout cohort".to_string())
            }
            RolloutSlot::BeyondHorizon => Some("rollout time beyond horizon".to_string()),
            RolloutSlot::At(at) if self.now < at => Some(format!(
                "rollout begins at {}",
                at.to_rfc3339_opts(SecondsFormat::Secs, true)
            )),
            RolloutSlot::At(_) => None,
        }
    }
}

/// The closed set of rules applied to version candidates.
#[derive(Debug, Clone)]
pub enum VersionRule {
    DenyWindow(DenyWindowGate),
    Concurrency(ConcurrencyGate),
    Approval(ApprovalFilter),
    VersionSelector(VersionSelectorFilter),
    Rollout(RolloutFilter),
}

impl Rule<DeploymentVersion> for VersionRule {
    fn name(&self) -> &'static str {
        match self {
            VersionRule::DenyWindow(_) => "deny_window",
            VersionRule::Concurrency(_) => "concurrency",
            VersionRule::Approval(_) => "approval",
            VersionRule::VersionSelector(_) => "version_selector",
            VersionRule::Rollout(_) => "rollout",
        }
    }

    fn pre_validate(&self) -> Gate {
        match self {
            VersionRule::DenyWindow(gate) => gate.check(),
            VersionRule::Concurrency(gate) => gate.check(),
            _ => Gate::Open,
        }
    }

    fn filter<'c>(&self, candidates: Vec<&'c DeploymentVersion>) -> Filtered<'c, DeploymentVersion> {
        match self {
            VersionRule::Approval(filter) => filter.filter(candidates),
            VersionRule::VersionSelector(filter) => {
                Filtered::partition(candidates, |v| filter.reject(v))
            }
            VersionRule::Rollout(filter) => Filtered::partition(candidates, |v| filter.reject(v)),
            VersionRule::DenyWindow(_) | VersionRule::Concurrency(_) => Filtered {
                allowed: candidates,
                rejected: Vec::new(),
            },
        }
    }
}

/// Data the version rules need besides the policy itself.
#[derive(Debug, Clone, Default)]
pub struct VersionRuleInputs {
    pub now: DateTime<Utc>,
    pub cohort_active_jobs: usize,
    pub approvals: HashMap<DeploymentVersionId, Vec<ApprovalRecord>>,
    pub rollout_times: HashMap<DeploymentVersionId, RolloutSlot>,
}

/// Build the rule list for one evaluation. Gates come first, then filters
/// in the order approval, version selector, rollout.
pub fn version_rules(policy: &EffectivePolicy, inputs: VersionRuleInputs) -> Vec<VersionRule> {
    let mut rules = Vec::new();
    if !policy.deny_windows.is_empty() {
        rules.push(VersionRule::DenyWindow(DenyWindowGate {
            windows: policy.deny_windows.clone(),
            now: inputs.now,
        }));
    }
    if let Some(cap) = policy.concurrency {
        rules.push(VersionRule::Concurrency(ConcurrencyGate {
            cap,
            active: inputs.cohort_active_jobs,
        }));
    }
    if policy.has_approvals() {
        rules.push(VersionRule::Approval(ApprovalFilter {
            requirements: policy.approvals.clone(),
            records: inputs.approvals,
        }));
    }
    if let Some(condition) = &policy.version_selector {
        rules.push(VersionRule::VersionSelector(VersionSelectorFilter {
            condition: condition.clone(),
        }));
    }
    if policy.rollout.is_some() {
        rules.push(VersionRule::Rollout(RolloutFilter {
            now: inputs.now,
            rollout_times: inputs.rollout_times,
        }));
    }
    rules
}
