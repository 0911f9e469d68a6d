//! Approval records against a (version, policy) pair.

use chrono::{DateTime, Utc};
use release_state::{DeploymentVersionId, PolicyId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalKind {
    Any,
    User,
    Role { role: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub version_id: DeploymentVersionId,
    pub policy_id: PolicyId,
    pub approver_id: String,
    pub kind: ApprovalKind,
    #[serde(default)]
    pub status: ApprovalStatus,
    pub approved_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ApprovalRecord {
    pub fn approved(
        version_id: DeploymentVersionId,
        policy_id: PolicyId,
        approver_id: impl Into<String>,
        kind: ApprovalKind,
        approved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version_id,
            policy_id,
            approver_id: approver_id.into(),
            kind,
            status: ApprovalStatus::Approved,
            approved_at,
            reason: None,
        }
    }

    pub fn rejected(
        version_id: DeploymentVersionId,
        policy_id: PolicyId,
        approver_id: impl Into<String>,
        approved_at: DateTime<Utc>,
        reason: Option<String>,
    ) -> Self {
        Self {
            version_id,
            policy_id,
            approver_id: approver_id.into(),
            kind: ApprovalKind::Any,
            status: ApprovalStatus::Rejected,
            approved_at,
            reason,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == ApprovalStatus::Approved
    }
}
