//! Domain read models consumed by the release engine.

pub mod approval;
pub mod context;
pub mod policy;
pub mod resource;
pub mod variable;
pub mod version;

pub use approval::{ApprovalKind, ApprovalRecord, ApprovalStatus};
pub use context::ReleaseTargetContext;
pub use policy::{
    ApprovalRequirement, DenyWindow, Frequency, Policy, PolicyTarget, Recurrence, RolloutConfig,
    RolloutType,
};
pub use resource::{Deployment, Environment, JobAgent, Resource, System};
pub use variable::{DeploymentVariable, ResourceVariable, VariableValue};
pub use version::{newest_first, DeploymentVersion, VersionStatus};
