//! Release-target membership reconciliation.
//!
//! When an environment's resource selector changes, newly matched resources
//! get one release target per deployment of the system that targets them,
//! and unmatched resources lose their targets in that environment. Exit
//! hooks fire only when a resource leaves the system entirely.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use release_state::{DeploymentId, EnvironmentId, ReleaseTargetId, ReleaseTargetRecord, ResourceId};
use serde::Serialize;
use tracing::{instrument, warn};

use crate::dispatch::ReleaseEngine;
use crate::domain::{Environment, Resource};
use crate::error::{ReleaseError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::selector::{diff, Condition, SelectorDiff};

/// Notified when a resource leaves a system for good.
#[async_trait]
pub trait ExitHook: Send + Sync {
    async fn on_exit(&self, resource_id: ResourceId, deployment_id: DeploymentId) -> Result<()>;
}

/// Exit hook that records every call.
#[derive(Debug, Default)]
pub struct RecordingExitHook {
    exits: Mutex<Vec<(ResourceId, DeploymentId)>>,
}

impl RecordingExitHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exits(&self) -> Vec<(ResourceId, DeploymentId)> {
        self.exits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ExitHook for RecordingExitHook {
    async fn on_exit(&self, resource_id: ResourceId, deployment_id: DeploymentId) -> Result<()> {
        self.exits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((resource_id, deployment_id));
        Ok(())
    }
}

/// What one selector change did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MembershipChange {
    pub diff: SelectorDiff,
    pub created: Vec<ReleaseTargetRecord>,
    pub deleted: Vec<ReleaseTargetId>,
    pub exited: Vec<(ResourceId, DeploymentId)>,
}

fn matches_environment(env: &Environment, resource: &Resource) -> bool {
    env.resource_selector
        .as_ref()
        .is_some_and(|selector| selector.matches(resource))
}

impl ReleaseEngine {
    /// Reconcile release targets after `environment_id`'s selector changed
    /// from `old` to `new`. Created targets are queued for evaluation.
    #[instrument(skip(self, old, new))]
    pub async fn on_selector_changed(
        &self,
        environment_id: EnvironmentId,
        old: Option<&Condition>,
        new: Option<&Condition>,
    ) -> Result<MembershipChange> {
        let environment = self
            .catalog
            .get_environment(&environment_id)
            .await?
            .ok_or_else(|| ReleaseError::not_found("environment", environment_id))?;
        // One snapshot for the diff and the exit check.
        let resources = self.catalog.list_resources().await?;
        let selector_diff = diff(old, new, &resources);
        let deployments = self
            .catalog
            .deployments_for_system(&environment.system_id)
            .await?;

        let mut change = MembershipChange::default();
        for resource in resources.iter().filter(|r| selector_diff.added.contains(&r.id)) {
            for deployment in deployments.iter().filter(|d| d.targets(resource)) {
                let (target, created) = self
                    .targets
                    .upsert_target(resource.id, environment_id, deployment.id)
                    .await?;
                if self.queue.enqueue(target.id) {
                    METRICS.inc_requeues();
                }
                if created {
                    change.created.push(target);
                }
            }
        }

        let other_environments: Vec<Environment> = self
            .catalog
            .environments_for_system(&environment.system_id)
            .await?
            .into_iter()
            .filter(|e| e.id != environment_id)
            .collect();

        for resource_id in &selector_diff.removed {
            let targets: Vec<ReleaseTargetRecord> = self
                .targets
                .targets_for_resource(resource_id)
                .await?
                .into_iter()
                .filter(|t| t.environment_id == environment_id)
                .collect();

            let mut affected = BTreeSet::new();
            for target in targets {
                if self.targets.delete_target(&target.id).await? {
                    change.deleted.push(target.id);
                    affected.insert(target.deployment_id);
                }
            }

            let still_in_system = resources
                .iter()
                .find(|r| r.id == *resource_id)
                .is_some_and(|r| other_environments.iter().any(|e| matches_environment(e, r)));
            if !still_in_system {
                for deployment_id in affected {
                    self.fire_exit(*resource_id, deployment_id).await;
                    change.exited.push((*resource_id, deployment_id));
                }
            }
        }

        obs::emit_membership_changed(
            &environment_id,
            selector_diff.added.len(),
            selector_diff.removed.len(),
            selector_diff.unchanged.len(),
        );
        change.diff = selector_diff;
        Ok(change)
    }

    /// A resource was deleted from inventory: drop all its targets and
    /// fire exit hooks for every deployment it had.
    #[instrument(skip(self))]
    pub async fn on_resource_deleted(&self, resource_id: ResourceId) -> Result<Vec<(ResourceId, DeploymentId)>> {
        let mut deployments = HashSet::new();
        for target in self.targets.targets_for_resource(&resource_id).await? {
            if self.targets.delete_target(&target.id).await? {
                deployments.insert(target.deployment_id);
            }
        }
        let mut exited: Vec<_> = deployments.into_iter().map(|d| (resource_id, d)).collect();
        exited.sort();
        for (resource_id, deployment_id) in &exited {
            self.fire_exit(*resource_id, *deployment_id).await;
        }
        Ok(exited)
    }

    async fn fire_exit(&self, resource_id: ResourceId, deployment_id: DeploymentId) {
        obs::emit_resource_exited(&resource_id, &deployment_id);
        for hook in &self.exit_hooks {
            if let Err(err) = hook.on_exit(resource_id, deployment_id).await {
                warn!(%resource_id, %deployment_id, error = %err, "exit hook failed");
            }
        }
    }
}
