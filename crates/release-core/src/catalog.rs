//! Read-side collaborators the engine consumes.
//!
//! The `Catalog` trait covers everything the engine reads but never writes:
//! inventory (resources), system configuration (environments, deployments,
//! job agents, variables), candidate versions, policies and approvals.
//! `MemoryCatalog` is the in-process implementation used by tests and the
//! CLI fixture loader.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use release_state::{
    DeploymentId, DeploymentVersionId, EnvironmentId, JobAgentId, PolicyId, ResourceId, SystemId,
};
use serde::{Deserialize, Serialize};

use crate::domain::*;
use crate::error::{ReleaseError, Result};

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>>;

    /// Every resource, read as one consistent snapshot.
    async fn list_resources(&self) -> Result<Vec<Resource>>;

    async fn get_environment(&self, id: &EnvironmentId) -> Result<Option<Environment>>;

    async fn environments_for_system(&self, system_id: &SystemId) -> Result<Vec<Environment>>;

    async fn get_deployment(&self, id: &DeploymentId) -> Result<Option<Deployment>>;

    async fn deployments_for_system(&self, system_id: &SystemId) -> Result<Vec<Deployment>>;

    async fn get_job_agent(&self, id: &JobAgentId) -> Result<Option<JobAgent>>;

    /// Candidate versions of a deployment, in no particular order.
    async fn list_versions(&self, deployment_id: &DeploymentId) -> Result<Vec<DeploymentVersion>>;

    async fn get_version(&self, id: &DeploymentVersionId) -> Result<Option<DeploymentVersion>>;

    async fn variables_for_deployment(
        &self,
        deployment_id: &DeploymentId,
    ) -> Result<Vec<DeploymentVariable>>;

    async fn resource_variables(&self, resource_id: &ResourceId) -> Result<Vec<ResourceVariable>>;

    async fn list_policies(&self) -> Result<Vec<Policy>>;

    async fn approvals_for(
        &self,
        version_id: &DeploymentVersionId,
        policy_id: &PolicyId,
    ) -> Result<Vec<ApprovalRecord>>;
}

/// Serializable contents of a catalog (the CLI workspace fixture format).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSnapshot {
    pub systems: Vec<System>,
    pub environments: Vec<Environment>,
    pub deployments: Vec<Deployment>,
    pub job_agents: Vec<JobAgent>,
    pub resources: Vec<Resource>,
    pub versions: Vec<DeploymentVersion>,
    pub variables: Vec<DeploymentVariable>,
    pub resource_variables: Vec<ResourceVariable>,
    pub policies: Vec<Policy>,
    pub approvals: Vec<ApprovalRecord>,
}

#[derive(Debug, Default)]
struct CatalogData {
    systems: HashMap<SystemId, System>,
    environments: HashMap<EnvironmentId, Environment>,
    deployments: HashMap<DeploymentId, Deployment>,
    job_agents: HashMap<JobAgentId, JobAgent>,
    // Insertion order is preserved for resources so snapshots are stable.
    resources: Vec<Resource>,
    versions: HashMap<DeploymentVersionId, DeploymentVersion>,
    variables: Vec<DeploymentVariable>,
    resource_variables: Vec<ResourceVariable>,
    policies: HashMap<PolicyId, Policy>,
    approvals: Vec<ApprovalRecord>,
}

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    data: Mutex<CatalogData>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a fixture, validating every policy.
    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Result<Self> {
        let catalog = Self::new();
        for system in snapshot.systems {
            catalog.upsert_system(system);
        }
        for env in snapshot.environments {
            catalog.upsert_environment(env)?;
        }
        for deployment in snapshot.deployments {
            catalog.upsert_deployment(deployment)?;
        }
        for agent in snapshot.job_agents {
            catalog.upsert_job_agent(agent);
        }
        for resource in snapshot.resources {
            catalog.upsert_resource(resource);
        }
        for version in snapshot.versions {
            catalog.upsert_version(version);
        }
        for variable in snapshot.variables {
            catalog.upsert_variable(variable)?;
        }
        for rv in snapshot.resource_variables {
            catalog.set_resource_variable(rv);
        }
        for policy in snapshot.policies {
            catalog.upsert_policy(policy)?;
        }
        for approval in snapshot.approvals {
            catalog.record_approval(approval);
        }
        Ok(catalog)
    }

    fn data(&self) -> MutexGuard<'_, CatalogData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn upsert_system(&self, system: System) {
        self.data().systems.insert(system.id, system);
    }

    /// Insert or replace an environment, returning the previous selector.
    pub fn upsert_environment(&self, env: Environment) -> Result<Option<crate::selector::Condition>> {
        if let Some(selector) = &env.resource_selector {
            selector.validate()?;
        }
        let previous = self.data().environments.insert(env.id, env);
        Ok(previous.and_then(|e| e.resource_selector))
    }

    pub fn upsert_deployment(&self, deployment: Deployment) -> Result<()> {
        if let Some(selector) = &deployment.resource_selector {
            selector.validate()?;
        }
        self.data().deployments.insert(deployment.id, deployment);
        Ok(())
    }

    pub fn upsert_job_agent(&self, agent: JobAgent) {
        self.data().job_agents.insert(agent.id, agent);
    }

    pub fn upsert_resource(&self, resource: Resource) {
        let mut data = self.data();
        match data.resources.iter_mut().find(|r| r.id == resource.id) {
            Some(existing) => *existing = resource,
            None => data.resources.push(resource),
        }
    }

    pub fn remove_resource(&self, id: &ResourceId) -> bool {
        let mut data = self.data();
        let before = data.resources.len();
        data.resources.retain(|r| r.id != *id);
        data.resources.len() != before
    }

    pub fn upsert_version(&self, version: DeploymentVersion) {
        self.data().versions.insert(version.id, version);
    }

    pub fn upsert_variable(&self, variable: DeploymentVariable) -> Result<()> {
        for value in &variable.values {
            if let Some(selector) = &value.resource_selector {
                selector.validate()?;
            }
        }
        let mut data = self.data();
        data.variables.retain(|v| v.id != variable.id);
        data.variables.push(variable);
        Ok(())
    }

    pub fn set_resource_variable(&self, variable: ResourceVariable) {
        let mut data = self.data();
        data.resource_variables
            .retain(|v| !(v.resource_id == variable.resource_id && v.key == variable.key));
        data.resource_variables.push(variable);
    }

    /// Validate and store a policy. Invalid policies are rejected.
    pub fn upsert_policy(&self, policy: Policy) -> Result<()> {
        policy.validate()?;
        self.data().policies.insert(policy.id, policy);
        Ok(())
    }

    pub fn remove_policy(&self, id: &PolicyId) -> bool {
        self.data().policies.remove(id).is_some()
    }

    pub fn record_approval(&self, approval: ApprovalRecord) {
        self.data().approvals.push(approval);
    }

    pub fn system_for_environment(&self, id: &EnvironmentId) -> Result<SystemId> {
        self.data()
            .environments
            .get(id)
            .map(|e| e.system_id)
            .ok_or_else(|| ReleaseError::not_found("environment", id))
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn get_resource(&self, id: &ResourceId) -> Result<Option<Resource>> {
        Ok(self.data().resources.iter().find(|r| r.id == *id).cloned())
    }

    async fn list_resources(&self) -> Result<Vec<Resource>> {
        Ok(self.data().resources.clone())
    }

    async fn get_environment(&self, id: &EnvironmentId) -> Result<Option<Environment>> {
        Ok(self.data().environments.get(id).cloned())
    }

    async fn environments_for_system(&self, system_id: &SystemId) -> Result<Vec<Environment>> {
        let mut envs: Vec<Environment> = self
            .data()
            .environments
            .values()
            .filter(|e| e.system_id == *system_id)
            .cloned()
            .collect();
        envs.sort_by_key(|e| e.id);
        Ok(envs)
    }

    async fn get_deployment(&self, id: &DeploymentId) -> Result<Option<Deployment>> {
        Ok(self.data().deployments.get(id).cloned())
    }

    async fn deployments_for_system(&self, system_id: &SystemId) -> Result<Vec<Deployment>> {
        let mut deployments: Vec<Deployment> = self
            .data()
            .deployments
            .values()
            .filter(|d| d.system_id == *system_id)
            .cloned()
            .collect();
        deployments.sort_by_key(|d| d.id);
        Ok(deployments)
    }

    async fn get_job_agent(&self, id: &JobAgentId) -> Result<Option<JobAgent>> {
        Ok(self.data().job_agents.get(id).cloned())
    }

    async fn list_versions(&self, deployment_id: &DeploymentId) -> Result<Vec<DeploymentVersion>> {
        Ok(self
            .data()
            .versions
            .values()
            .filter(|v| v.deployment_id == *deployment_id)
            .cloned()
            .collect())
    }

    async fn get_version(&self, id: &DeploymentVersionId) -> Result<Option<DeploymentVersion>> {
        Ok(self.data().versions.get(id).cloned())
    }

    async fn variables_for_deployment(
        &self,
        deployment_id: &DeploymentId,
    ) -> Result<Vec<DeploymentVariable>> {
        Ok(self
            .data()
            .variables
            .iter()
            .filter(|v| v.deployment_id == *deployment_id)
            .cloned()
            .collect())
    }

    async fn resource_variables(&self, resource_id: &ResourceId) -> Result<Vec<ResourceVariable>> {
        Ok(self
            .data()
            .resource_variables
            .iter()
            .filter(|v| v.resource_id == *resource_id)
            .cloned()
            .collect())
    }

    async fn list_policies(&self) -> Result<Vec<Policy>> {
        Ok(self.data().policies.values().cloned().collect())
    }

    async fn approvals_for(
        &self,
        version_id: &DeploymentVersionId,
        policy_id: &PolicyId,
    ) -> Result<Vec<ApprovalRecord>> {
        Ok(self
            .data()
            .approvals
            .iter()
            .filter(|a| a.version_id == *version_id && a.policy_id == *policy_id)
            .cloned()
            .collect())
    }
}
