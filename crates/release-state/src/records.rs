//! Record types for everything the release engine writes.
//!
//! - `ReleaseTargetRecord`: one resource x environment x deployment triple
//! - `VersionReleaseRecord` / `VariableSetReleaseRecord`: chosen candidates
//! - `ReleaseRecord`: immutable pairing of one version release and one
//!   variable-set release
//! - `JobRecord`: the dispatchable unit for a release

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::ids::*;

/// A release target: the unit of deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseTargetRecord {
    pub id: ReleaseTargetId,
    pub resource_id: ResourceId,
    pub environment_id: EnvironmentId,
    pub deployment_id: DeploymentId,
    /// Operator override pinning a specific release.
    pub desired_release_id: Option<ReleaseId>,
    pub created_at: DateTime<Utc>,
}

impl ReleaseTargetRecord {
    pub fn new(
        resource_id: ResourceId,
        environment_id: EnvironmentId,
        deployment_id: DeploymentId,
    ) -> Self {
        Self {
            id: ReleaseTargetId::new(),
            resource_id,
            environment_id,
            deployment_id,
            desired_release_id: None,
            created_at: Utc::now(),
        }
    }

    /// The uniqueness key of a release target.
    pub fn identity(&self) -> (ResourceId, EnvironmentId, DeploymentId) {
        (self.resource_id, self.environment_id, self.deployment_id)
    }
}

/// Binds a release target to a chosen deployment version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReleaseRecord {
    pub id: VersionReleaseId,
    pub release_target_id: ReleaseTargetId,
    pub version_id: DeploymentVersionId,
    pub created_at: DateTime<Utc>,
}

impl VersionReleaseRecord {
    pub fn new(release_target_id: ReleaseTargetId, version_id: DeploymentVersionId) -> Self {
        Self {
            id: VersionReleaseId::new(),
            release_target_id,
            version_id,
            created_at: Utc::now(),
        }
    }
}

/// A resolved variable value captured at release time.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSnapshot {
    pub key: String,
    pub value: serde_json::Value,
    pub sensitive: bool,
}

impl fmt::Debug for VariableSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("VariableSnapshot");
        s.field("key", &self.key);
        if self.sensitive {
            s.field("value", &"<redacted>");
        } else {
            s.field("value", &self.value);
        }
        s.field("sensitive", &self.sensitive).finish()
    }
}

/// Binds a release target to a snapshot of variable values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSetReleaseRecord {
    pub id: VariableSetReleaseId,
    pub release_target_id: ReleaseTargetId,
    /// Sorted by key.
    pub values: Vec<VariableSnapshot>,
    pub created_at: DateTime<Utc>,
}

impl VariableSetReleaseRecord {
    pub fn new(release_target_id: ReleaseTargetId, mut values: Vec<VariableSnapshot>) -> Self {
        values.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            id: VariableSetReleaseId::new(),
            release_target_id,
            values,
            created_at: Utc::now(),
        }
    }

    /// Whether this release already captures exactly `values` (order-insensitive).
    pub fn has_same_values(&self, values: &[VariableSnapshot]) -> bool {
        if self.values.len() != values.len() {
            return false;
        }
        let mut sorted: Vec<&VariableSnapshot> = values.iter().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));
        self.values.iter().zip(sorted).all(|(a, b)| a == b)
    }
}

/// Pairs one version release with one variable-set release.
///
/// At most one release exists per `(version_release_id, variable_release_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub id: ReleaseId,
    pub release_target_id: ReleaseTargetId,
    pub version_release_id: VersionReleaseId,
    pub variable_release_id: VariableSetReleaseId,
    pub created_at: DateTime<Utc>,
}

impl ReleaseRecord {
    pub fn new(
        release_target_id: ReleaseTargetId,
        version_release_id: VersionReleaseId,
        variable_release_id: VariableSetReleaseId,
    ) -> Self {
        Self {
            id: ReleaseId::new(),
            release_target_id,
            version_release_id,
            variable_release_id,
            created_at: Utc::now(),
        }
    }
}

/// External execution status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    ActionRequired,
    Successful,
    Failure,
    Cancelled,
    Skipped,
    InvalidJobAgent,
    InvalidIntegration,
    ExternalRunNotFound,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::ActionRequired => "action_required",
            JobStatus::Successful => "successful",
            JobStatus::Failure => "failure",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Skipped => "skipped",
            JobStatus::InvalidJobAgent => "invalid_job_agent",
            JobStatus::InvalidIntegration => "invalid_integration",
            JobStatus::ExternalRunNotFound => "external_run_not_found",
        }
    }

    /// Statuses that count against a concurrency cap.
    pub const ACTIVE: [JobStatus; 3] = [
        JobStatus::Pending,
        JobStatus::InProgress,
        JobStatus::ActionRequired,
    ];

    /// Statuses whose version counts as "already deployed" for recency bounds.
    pub const DEPLOYED: [JobStatus; 2] = [JobStatus::Successful, JobStatus::InProgress];

    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    pub fn is_deployed(self) -> bool {
        Self::DEPLOYED.contains(&self)
    }

    /// Terminal statuses are never left once reached.
    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "pending" => JobStatus::Pending,
            "in_progress" => JobStatus::InProgress,
            "action_required" => JobStatus::ActionRequired,
            "successful" => JobStatus::Successful,
            "failure" => JobStatus::Failure,
            "cancelled" => JobStatus::Cancelled,
            "skipped" => JobStatus::Skipped,
            "invalid_job_agent" => JobStatus::InvalidJobAgent,
            "invalid_integration" => JobStatus::InvalidIntegration,
            "external_run_not_found" => JobStatus::ExternalRunNotFound,
            other => return Err(format!("unknown job status: {other}")),
        };
        Ok(status)
    }
}

/// A dispatchable job for a release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub release_id: ReleaseId,
    pub release_target_id: ReleaseTargetId,
    pub job_agent_id: Option<JobAgentId>,
    pub job_agent_config: serde_json::Value,
    pub status: JobStatus,
    pub external_id: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(
        release_id: ReleaseId,
        release_target_id: ReleaseTargetId,
        job_agent_id: Option<JobAgentId>,
        job_agent_config: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            release_id,
            release_target_id,
            job_agent_id,
            job_agent_config,
            status: JobStatus::Pending,
            external_id: None,
            message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply an inbound status update.
    ///
    /// Terminal jobs only accept a repeat of their own status (callbacks may
    /// be delivered more than once).
    pub fn apply_update(&mut self, update: &JobUpdate, now: DateTime<Utc>) -> Result<(), StorageError> {
        if self.status.is_terminal() && update.status != self.status {
            return Err(StorageError::InvalidJobTransition {
                id: self.id.to_string(),
                from: self.status.to_string(),
                to: update.status.to_string(),
            });
        }

        if update.status == JobStatus::InProgress && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if update.status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        if let Some(external_id) = &update.external_id {
            self.external_id = Some(external_id.clone());
        }
        if let Some(message) = &update.message {
            self.message = Some(message.clone());
        }
        self.status = update.status;
        self.updated_at = now;
        Ok(())
    }
}

/// Inbound status callback payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub external_id: Option<String>,
    pub message: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            external_id: None,
            message: None,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
