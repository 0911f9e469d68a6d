//! Environment rollout scheduling.
//!
//! Every release target of a deployment x environment cohort gets a
//! position per version by sorting the cohort on
//! `sha256("{release_target_id}:{version_id}")`. The position maps to a
//! delay through the configured offset curve. Everything here is a pure
//! function of its inputs and is recomputed on demand.

use chrono::{DateTime, Duration, DurationRound, Utc};
use release_state::{DeploymentVersionId, ReleaseTargetId};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::{ApprovalRecord, DeploymentVersion, RolloutConfig, RolloutType};
use crate::policy::EffectivePolicy;
use crate::rules::{evaluate_approvals, ApprovalOutcome};

fn position_key(target: &ReleaseTargetId, version: &DeploymentVersionId) -> String {
    let digest = Sha256::digest(format!("{target}:{version}").as_bytes());
    hex::encode(digest)
}

/// Position of `target` within `cohort` for `version`, or `None` if the
/// target is not part of the cohort.
pub fn rollout_position(
    target: &ReleaseTargetId,
    version: &DeploymentVersionId,
    cohort: &[ReleaseTargetId],
) -> Option<usize> {
    let mut keyed: Vec<(String, ReleaseTargetId)> = cohort
        .iter()
        .map(|id| (position_key(id, version), *id))
        .collect();
    keyed.sort();
    keyed.dedup_by(|a, b| a.1 == b.1);
    keyed.iter().position(|(_, id)| id == target)
}

/// Sum of `g^k` for `k` in `0..n`.
fn geometric(g: f64, n: usize) -> f64 {
    (0..n).fold((0.0, 1.0), |(sum, term), _| (sum + term, term * g)).0
}

/// `geometric(g, n) / geometric(g, m)` for `n <= m`, computed in
/// powers of `1/g` when `g > 1` so steep curves neither overflow nor
/// produce NaN.
fn geometric_ratio(g: f64, n: usize, m: usize) -> f64 {
    if g <= 1.0 {
        return geometric(g, n) / geometric(g, m);
    }
    let h = 1.0 / g;
    h.powi((m - n) as i32) * geometric(h, n) / geometric(h, m)
}

/// Delay of `position` in a cohort of `cohort_size` targets, or `None`
/// when the curve runs past what a `Duration` can hold (steep exponential
/// curves over large cohorts).
pub fn rollout_offset(
    config: &RolloutConfig,
    cohort_size: usize,
    position: usize,
) -> Option<Duration> {
    if cohort_size == 0 {
        return Some(Duration::zero());
    }
    let scale = config.time_scale_interval()?.num_milliseconds() as f64;
    let n = cohort_size as f64;
    let g = config.growth_factor;

    let millis = match config.rollout_type {
        RolloutType::Linear => scale / n * position as f64,
        RolloutType::Exponential => scale / n * geometric(g, position),
        RolloutType::LinearNormalized => {
            if cohort_size <= 1 {
                0.0
            } else {
                scale * position as f64 / (n - 1.0)
            }
        }
        RolloutType::ExponentialNormalized => {
            if cohort_size <= 1 {
                0.0
            } else {
                scale * geometric_ratio(g, position, cohort_size - 1)
            }
        }
    };
    let millis = millis.round();
    // i64::MAX as f64 rounds up to 2^63, so the bound is exclusive.
    if !millis.is_finite() || millis < 0.0 || millis >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(millis as i64)
}

pub fn floor_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::minutes(1)).unwrap_or(t)
}

/// When the version's rollout began: its creation time when no approvals
/// apply, else the moment its approvals completed. `None` until then.
pub fn rollout_start(
    version: &DeploymentVersion,
    policy: Option<&EffectivePolicy>,
    approvals: &[ApprovalRecord],
) -> Option<DateTime<Utc>> {
    let requirements = policy.map(|p| p.approvals.as_slice()).unwrap_or(&[]);
    match evaluate_approvals(requirements, approvals) {
        ApprovalOutcome::Approved { at: Some(at) } => Some(at),
        ApprovalOutcome::Approved { at: None } => Some(version.created_at),
        ApprovalOutcome::Pending(_) | ApprovalOutcome::Rejected(_) => None,
    }
}

/// Where one release target stands in one version's rollout, as seen by
/// the rollout rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutSlot {
    /// Approvals are incomplete, so the rollout has no start.
    AwaitingApproval,
    /// The target is missing from its cohort snapshot.
    NotInCohort,
    /// The slot lies past any representable time.
    BeyondHorizon,
    /// The slot opens at this instant.
    At(DateTime<Utc>),
}

/// Read model for where a release target sits in a version's rollout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RolloutStatus {
    pub release_target_id: ReleaseTargetId,
    pub version_id: DeploymentVersionId,
    pub position: usize,
    pub cohort_size: usize,
    /// `None` when the offset is beyond the representable horizon.
    pub offset_seconds: Option<i64>,
    pub rollout_start: Option<DateTime<Utc>>,
    /// `floor_to_minute(rollout_start) + offset`.
    pub rollout_time: Option<DateTime<Utc>>,
}

impl RolloutStatus {
    pub fn offset(&self) -> Option<Duration> {
        self.offset_seconds.and_then(Duration::try_seconds)
    }

    pub fn slot(&self) -> RolloutSlot {
        match (self.rollout_start, self.rollout_time) {
            (None, _) => RolloutSlot::AwaitingApproval,
            (Some(_), None) => RolloutSlot::BeyondHorizon,
            (Some(_), Some(at)) => RolloutSlot::At(at),
        }
    }

    pub fn is_eligible_at(&self, now: DateTime<Utc>) -> bool {
        self.rollout_time.is_some_and(|t| now >= t)
    }
}

/// Compute the rollout status of `target` for `version`.
pub fn rollout_status(
    config: &RolloutConfig,
    target: &ReleaseTargetId,
    version: &DeploymentVersion,
    cohort: &[ReleaseTargetId],
    start: Option<DateTime<Utc>>,
) -> Option<RolloutStatus> {
    let position = rollout_position(target, &version.id, cohort)?;
    let cohort_size = cohort.len();
    let offset = rollout_offset(config, cohort_size, position);
    let rollout_time = match (start, offset) {
        (Some(start), Some(offset)) => floor_to_minute(start).checked_add_signed(offset),
        _ => None,
    };
    Some(RolloutStatus {
        release_target_id: *target,
        version_id: version.id,
        position,
        cohort_size,
        offset_seconds: offset.map(|o| o.num_seconds()),
        rollout_start: start,
        rollout_time,
    })
}
