//! Resources, systems, environments, deployments and job agents.
//!
//! These are supplied by external collaborators (inventory scanning, system
//! configuration) and are read-only to the engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use release_state::{DeploymentId, EnvironmentId, JobAgentId, ResourceId, SystemId};
use serde::{Deserialize, Serialize};

use crate::selector::{Condition, Selectable};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub kind: String,
    pub identifier: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: ResourceId::new(),
            identifier: name.clone(),
            name,
            kind: kind.into(),
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl Selectable for Resource {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    fn kind(&self) -> Option<&str> {
        Some(&self.kind)
    }

    fn identifier(&self) -> Option<&str> {
        Some(&self.identifier)
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    pub id: SystemId,
    pub name: String,
}

/// An environment of a system; its selector decides which resources it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub system_id: SystemId,
    pub name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Absent selector matches no resources.
    #[serde(default)]
    pub resource_selector: Option<Condition>,
}

impl Selectable for Environment {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub system_id: SystemId,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Narrows the system's resources further; absent means every resource.
    #[serde(default)]
    pub resource_selector: Option<Condition>,
    #[serde(default)]
    pub job_agent_id: Option<JobAgentId>,
    #[serde(default)]
    pub job_agent_config: serde_json::Value,
}

impl Deployment {
    /// Whether this deployment targets `resource` (independent of environment).
    pub fn targets(&self, resource: &Resource) -> bool {
        self.resource_selector
            .as_ref()
            .map_or(true, |selector| selector.matches(resource))
    }
}

impl Selectable for Deployment {
    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    fn identifier(&self) -> Option<&str> {
        Some(&self.slug)
    }
}

/// An executor integration jobs are dispatched to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAgent {
    pub id: JobAgentId,
    pub name: String,
    /// Integration kind, e.g. `github-app` or `kubernetes-job`.
    pub kind: String,
}
