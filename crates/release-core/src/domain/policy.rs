//! Policies: selector-scoped bundles of release rules.

use chrono::NaiveDateTime;
use release_state::PolicyId;
use serde::{Deserialize, Serialize};

use crate::domain::context::ReleaseTargetContext;
use crate::error::PolicyConfigError;
use crate::selector::Condition;

fn enabled_by_default() -> bool {
    true
}

fn one() -> u32 {
    1
}

/// Scopes a policy. A target matches a release target when every selector
/// it defines matches; undefined selectors match anything.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PolicyTarget {
    #[serde(default)]
    pub deployment_selector: Option<Condition>,
    #[serde(default)]
    pub environment_selector: Option<Condition>,
    #[serde(default)]
    pub resource_selector: Option<Condition>,
}

impl PolicyTarget {
    pub fn matches(&self, ctx: &ReleaseTargetContext) -> bool {
        self.deployment_selector
            .as_ref()
            .map_or(true, |c| c.matches(&ctx.deployment))
            && self
                .environment_selector
                .as_ref()
                .map_or(true, |c| c.matches(&ctx.environment))
            && self
                .resource_selector
                .as_ref()
                .map_or(true, |c| c.matches(&ctx.resource))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub frequency: Frequency,
    #[serde(default = "one")]
    pub interval: u32,
    /// Weekly only: the weekdays an occurrence starts on. Empty means the
    /// weekday of `dtstart`.
    #[serde(default)]
    pub by_weekday: Vec<chrono::Weekday>,
    /// Local time after which no occurrence starts.
    #[serde(default)]
    pub until: Option<NaiveDateTime>,
}

/// A recurring period during which no version may be released.
///
/// `dtstart` / `dtend` are wall-clock times in `time_zone`. Without `dtend`
/// an occurrence lasts until the next one starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyWindow {
    #[serde(default)]
    pub name: String,
    pub time_zone: String,
    pub dtstart: NaiveDateTime,
    #[serde(default)]
    pub dtend: Option<NaiveDateTime>,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
}

/// One approval requirement; all requirements of all applicable policies
/// must be met.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalRequirement {
    /// `required` distinct approvers, whoever they are.
    Any { required: u32 },
    /// A named user must approve.
    User { user_id: String },
    /// `required` distinct approvers acting in `role`.
    Role { role: String, required: u32 },
}

impl ApprovalRequirement {
    pub fn describe(&self) -> String {
        match self {
            ApprovalRequirement::Any { required } => format!("{required} approval(s)"),
            ApprovalRequirement::User { user_id } => format!("approval from user {user_id}"),
            ApprovalRequirement::Role { role, required } => {
                format!("{required} approval(s) from role {role}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutType {
    #[default]
    Linear,
    LinearNormalized,
    Exponential,
    ExponentialNormalized,
}

/// Staggers a version across the release targets of one
/// deployment x environment cohort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutConfig {
    #[serde(default)]
    pub rollout_type: RolloutType,
    pub growth_factor: f64,
    pub time_scale_interval_minutes: i64,
}

impl RolloutConfig {
    /// Longest accepted time scale interval: one year.
    pub const MAX_TIME_SCALE_INTERVAL_MINUTES: i64 = 366 * 24 * 60;

    /// `None` when the interval does not fit a `Duration`; validated
    /// configs always fit.
    pub fn time_scale_interval(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_minutes(self.time_scale_interval_minutes)
    }

    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        if !(self.growth_factor > 0.0) || !self.growth_factor.is_finite() {
            return Err(PolicyConfigError::InvalidGrowthFactor(self.growth_factor));
        }
        if self.time_scale_interval_minutes <= 0 {
            return Err(PolicyConfigError::InvalidTimeScale(
                self.time_scale_interval_minutes,
            ));
        }
        if self.time_scale_interval_minutes > Self::MAX_TIME_SCALE_INTERVAL_MINUTES {
            return Err(PolicyConfigError::TimeScaleTooLarge {
                minutes: self.time_scale_interval_minutes,
                max: Self::MAX_TIME_SCALE_INTERVAL_MINUTES,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Higher priority wins for override facets.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub targets: Vec<PolicyTarget>,
    #[serde(default)]
    pub deny_windows: Vec<DenyWindow>,
    #[serde(default)]
    pub version_selector: Option<Condition>,
    #[serde(default)]
    pub approvals: Vec<ApprovalRequirement>,
    #[serde(default)]
    pub concurrency: Option<u32>,
    #[serde(default)]
    pub rollout: Option<RolloutConfig>,
}

impl Policy {
    /// An enabled policy with one catch-all target and no rules.
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            id: PolicyId::new(),
            name: name.into(),
            description: None,
            priority,
            enabled: true,
            targets: vec![PolicyTarget::default()],
            deny_windows: Vec::new(),
            version_selector: None,
            approvals: Vec::new(),
            concurrency: None,
            rollout: None,
        }
    }

    pub fn with_target(mut self, target: PolicyTarget) -> Self {
        self.targets = vec![target];
        self
    }

    pub fn with_deny_window(mut self, window: DenyWindow) -> Self {
        self.deny_windows.push(window);
        self
    }

    pub fn with_version_selector(mut self, selector: Condition) -> Self {
        self.version_selector = Some(selector);
        self
    }

    pub fn with_approval(mut self, requirement: ApprovalRequirement) -> Self {
        self.approvals.push(requirement);
        self
    }

    pub fn with_concurrency(mut self, cap: u32) -> Self {
        self.concurrency = Some(cap);
        self
    }

    pub fn with_rollout(mut self, rollout: RolloutConfig) -> Self {
        self.rollout = Some(rollout);
        self
    }

    /// Whether any of this policy's targets covers the release target.
    pub fn applies_to(&self, ctx: &ReleaseTargetContext) -> bool {
        self.targets.iter().any(|t| t.matches(ctx))
    }

    /// Write-time validation. Invalid policies are rejected, never defaulted.
    pub fn validate(&self) -> Result<(), PolicyConfigError> {
        if self.targets.is_empty() {
            return Err(PolicyConfigError::NoTargets);
        }
        for target in &self.targets {
            validate_condition("deployment selector", &target.deployment_selector)?;
            validate_condition("environment selector", &target.environment_selector)?;
            validate_condition("resource selector", &target.resource_selector)?;
        }
        validate_condition("version selector", &self.version_selector)?;

        for window in &self.deny_windows {
            window.validate()?;
        }

        for requirement in &self.approvals {
            match requirement {
                ApprovalRequirement::Any { required } | ApprovalRequirement::Role { required, .. }
                    if *required == 0 =>
                {
                    return Err(PolicyConfigError::ZeroApprovalCount)
                }
                ApprovalRequirement::User { user_id } if user_id.trim().is_empty() => {
                    return Err(PolicyConfigError::EmptyApprover)
                }
                _ => {}
            }
        }

        if self.concurrency == Some(0) {
            return Err(PolicyConfigError::ZeroConcurrency);
        }
        if let Some(rollout) = &self.rollout {
            rollout.validate()?;
        }
        Ok(())
    }
}

fn validate_condition(
    facet: &'static str,
    condition: &Option<Condition>,
) -> Result<(), PolicyConfigError> {
    match condition {
        Some(c) => c
            .validate()
            .map_err(|source| PolicyConfigError::Condition { facet, source }),
        None => Ok(()),
    }
}
