//! Explicit read model for one release target evaluation.

use release_state::ReleaseTargetRecord;
use serde::Serialize;

use crate::domain::{Deployment, Environment, Resource};

/// Everything the engine needs to know about a release target, assembled
/// once per evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseTargetContext {
    pub target: ReleaseTargetRecord,
    pub resource: Resource,
    pub environment: Environment,
    pub deployment: Deployment,
}

impl ReleaseTargetContext {
    pub fn new(
        target: ReleaseTargetRecord,
        resource: Resource,
        environment: Environment,
        deployment: Deployment,
    ) -> Self {
        Self {
            target,
            resource,
            environment,
            deployment,
        }
    }
}
