//! Release Core Library
//!
//! Policy-driven release resolution: decides, for every release target,
//! which deployment version and variable snapshot should run, and turns
//! that decision into a dispatchable job.

pub mod assembler;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod manager;
pub mod membership;
pub mod metrics;
pub mod obs;
pub mod policy;
pub mod rollout;
pub mod rules;
pub mod selector;
pub mod telemetry;

pub use catalog::{Catalog, CatalogSnapshot, MemoryCatalog};
pub use config::EngineConfig;
pub use dispatch::{
    EvaluationOutcome, EvaluationQueue, EvaluationReceiver, JobExecutor, Lease, LeaseTable,
    RecordingExecutor, ReleaseEngine,
};
pub use domain::{
    ApprovalKind, ApprovalRecord, ApprovalRequirement, ApprovalStatus, DenyWindow, Deployment,
    DeploymentVariable, DeploymentVersion, Environment, Frequency, JobAgent, Policy, PolicyTarget,
    Recurrence, ReleaseTargetContext, Resource, ResourceVariable, RolloutConfig, RolloutType,
    System, VariableValue, VersionStatus,
};
pub use error::{ConditionError, PolicyConfigError, ReleaseError, Result};
pub use manager::{VariableDecision, VariableManager, VersionDecision, VersionManager};
pub use membership::{ExitHook, MembershipChange, RecordingExitHook};
pub use policy::{merge, EffectivePolicy, PolicySnapshot, Sourced};
pub use rollout::{rollout_offset, rollout_position, RolloutSlot, RolloutStatus};
pub use rules::{evaluate, Candidate, Gate, RejectionReasons, Rule, RuleEvaluation};
pub use selector::{diff, select_resources, Condition, Selectable, SelectorDiff};

pub use release_state::{
    JobRecord, JobStatus, JobUpdate, MemoryReleaseStore, ReleaseRecord, ReleaseTargetRecord,
    StorageError,
};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
