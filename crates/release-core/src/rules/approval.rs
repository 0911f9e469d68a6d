//! Approval gating.
//!
//! Approvals are recorded per (version, policy). A requirement is met at the
//! moment its last needed approval arrived; any rejection recorded for a
//! (version, policy) pair blocks that version for every requirement of the
//! policy.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use release_state::DeploymentVersionId;

use super::{Filtered, Rule};
use crate::domain::{
    ApprovalKind, ApprovalRecord, ApprovalRequirement, ApprovalStatus, DeploymentVersion,
};
use crate::policy::Sourced;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// Every requirement is met. `at` is when the last one was met, or
    /// `None` when there were no requirements.
    Approved { at: Option<DateTime<Utc>> },
    Pending(String),
    Rejected(String),
}

/// Time at which the `required`-th distinct approver in `records` approved.
fn nth_distinct_approval<'a>(
    records: impl Iterator<Item = &'a ApprovalRecord>,
    required: u32,
) -> Option<DateTime<Utc>> {
    let mut approved: Vec<&ApprovalRecord> = records.filter(|r| r.is_approved()).collect();
    approved.sort_by_key(|r| r.approved_at);
    let mut seen = HashSet::new();
    approved
        .into_iter()
        .filter(|r| seen.insert(r.approver_id.as_str()))
        .nth(required.saturating_sub(1) as usize)
        .map(|r| r.approved_at)
}

/// When `requirement` became satisfied by `records`, if it has.
pub fn requirement_met_at(
    requirement: &ApprovalRequirement,
    records: &[ApprovalRecord],
) -> Option<DateTime<Utc>> {
    match requirement {
        ApprovalRequirement::Any { required } => nth_distinct_approval(
            records.iter().filter(|r| r.kind == ApprovalKind::Any),
            *required,
        ),
        ApprovalRequirement::User { user_id } => records
            .iter()
            .filter(|r| r.is_approved() && r.kind == ApprovalKind::User && r.approver_id == *user_id)
            .map(|r| r.approved_at)
            .min(),
        ApprovalRequirement::Role { role, required } => nth_distinct_approval(
            records
                .iter()
                .filter(|r| matches!(&r.kind, ApprovalKind::Role { role: r_role } if r_role == role)),
            *required,
        ),
    }
}

/// Check every requirement against the records of one version.
pub fn evaluate_approvals(
    requirements: &[Sourced<ApprovalRequirement>],
    records: &[ApprovalRecord],
) -> ApprovalOutcome {
    if requirements.is_empty() {
        return ApprovalOutcome::Approved { at: None };
    }

    let policies: HashSet<_> = requirements.iter().map(|r| r.policy_id).collect();
    if let Some(rejection) = records
        .iter()
        .filter(|r| r.status == ApprovalStatus::Rejected && policies.contains(&r.policy_id))
        .min_by_key(|r| r.approved_at)
    {
        let mut reason = format!(
            "rejected by {} (policy {})",
            rejection.approver_id, rejection.policy_id
        );
        if let Some(note) = &rejection.reason {
            reason.push_str(": ");
            reason.push_str(note);
        }
        return ApprovalOutcome::Rejected(reason);
    }

    let mut latest: Option<DateTime<Utc>> = None;
    let mut missing = Vec::new();
    for requirement in requirements {
        let scoped: Vec<ApprovalRecord> = records
            .iter()
            .filter(|r| r.policy_id == requirement.policy_id)
            .cloned()
            .collect();
        match requirement_met_at(&requirement.rule, &scoped) {
            Some(at) => latest = Some(latest.map_or(at, |l| l.max(at))),
            None => missing.push(format!(
                "{} (policy {})",
                requirement.rule.describe(),
                requirement.policy_id
            )),
        }
    }

    if missing.is_empty() {
        ApprovalOutcome::Approved { at: latest }
    } else {
        ApprovalOutcome::Pending(format!("awaiting {}", missing.join("; ")))
    }
}

/// Rejects versions whose approval requirements are not all met.
#[derive(Debug, Clone, Default)]
pub struct ApprovalFilter {
    pub requirements: Vec<Sourced<ApprovalRequirement>>,
    /// Records per candidate version, across all contributing policies.
    pub records: HashMap<DeploymentVersionId, Vec<ApprovalRecord>>,
}

impl ApprovalFilter {
    pub fn outcome(&self, version_id: &DeploymentVersionId) -> ApprovalOutcome {
        let records = self.records.get(version_id).map(Vec::as_slice).unwrap_or(&[]);
        evaluate_approvals(&self.requirements, records)
    }
}

impl Rule<DeploymentVersion> for ApprovalFilter {
    fn name(&self) -> &'static str {
        "approval"
    }

    fn filter<'c>(&self, candidates: Vec<&'c DeploymentVersion>) -> Filtered<'c, DeploymentVersion> {
        Filtered::partition(candidates, |version| match self.outcome(&version.id) {
            ApprovalOutcome::Approved { .. } => None,
            ApprovalOutcome::Pending(reason) | ApprovalOutcome::Rejected(reason) => Some(reason),
        })
    }
}
