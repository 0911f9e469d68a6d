//! Deployment versions: the version candidates of the rule engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use release_state::{DeploymentId, DeploymentVersionId};
use serde::{Deserialize, Serialize};

use crate::selector::Selectable;

/// Build state of a version. Only `Ready` versions are deployable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Building,
    #[default]
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentVersion {
    pub id: DeploymentVersionId,
    pub deployment_id: DeploymentId,
    pub tag: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
}

impl DeploymentVersion {
    pub fn new(deployment_id: DeploymentId, tag: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let tag = tag.into();
        Self {
            id: DeploymentVersionId::new(),
            deployment_id,
            name: tag.clone(),
            tag,
            metadata: BTreeMap::new(),
            status: VersionStatus::Ready,
            created_at,
        }
    }

    pub fn with_status(mut self, status: VersionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_ready(&self) -> bool {
        self.status == VersionStatus::Ready
    }
}

impl Selectable for DeploymentVersion {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    fn tag(&self) -> Option<&str> {
        Some(&self.tag)
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

/// Newest first; ties broken by id so the order is total.
pub fn newest_first(versions: &mut [DeploymentVersion]) {
    versions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}
