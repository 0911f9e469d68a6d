//! Storage trait definitions for the release engine
//!
//! These traits define the persistence seams:
//! - `ReleaseTargetStore`: release-target membership (create/delete/pin)
//! - `ReleaseStore`: release history and jobs, read side
//! - `ReleaseTxn`: a write unit scoped to one release target; staged writes
//!   become visible together on `commit` or not at all
//!
//! All traits are async and backend-agnostic. In-memory implementations live
//! in the `memory` module, SurrealDB-backed ones in `surreal_store`.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::ids::*;
use crate::records::*;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ReleaseTargetStore
// ---------------------------------------------------------------------------

/// Release-target membership.
///
/// Guarantees:
/// - At most one target per `(resource, environment, deployment)`.
/// - Deleting a target cascades to its releases and jobs.
#[async_trait]
pub trait ReleaseTargetStore: Send + Sync {
    /// Create the target for the identity tuple, or return the existing one.
    /// The boolean is `true` when a new row was inserted.
    async fn upsert_target(
        &self,
        resource_id: ResourceId,
        environment_id: EnvironmentId,
        deployment_id: DeploymentId,
    ) -> StorageResult<(ReleaseTargetRecord, bool)>;

    async fn get_target(&self, id: &ReleaseTargetId) -> StorageResult<Option<ReleaseTargetRecord>>;

    /// Delete a target and everything it owns. Returns `false` if absent.
    async fn delete_target(&self, id: &ReleaseTargetId) -> StorageResult<bool>;

    async fn list_targets(&self) -> StorageResult<Vec<ReleaseTargetRecord>>;

    async fn targets_for_environment(
        &self,
        environment_id: &EnvironmentId,
    ) -> StorageResult<Vec<ReleaseTargetRecord>>;

    /// All targets sharing a deployment and environment.
    async fn targets_for_cohort(
        &self,
        deployment_id: &DeploymentId,
        environment_id: &EnvironmentId,
    ) -> StorageResult<Vec<ReleaseTargetRecord>>;

    async fn targets_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> StorageResult<Vec<ReleaseTargetRecord>>;

    /// Pin (or with `None`, unpin) a release on a target.
    async fn set_desired_release(
        &self,
        id: &ReleaseTargetId,
        release_id: Option<ReleaseId>,
    ) -> StorageResult<ReleaseTargetRecord>;
}

// ---------------------------------------------------------------------------
// ReleaseStore
// ---------------------------------------------------------------------------

/// Release history and jobs.
///
/// Semantics:
/// - History is append-only; the newest row per target is "current".
/// - Writes only happen through a [`ReleaseTxn`].
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Open a write unit for one release target.
    ///
    /// Fails with `StorageError::TargetNotVisible` if the target row cannot
    /// be seen yet.
    async fn begin(&self, release_target_id: &ReleaseTargetId) -> StorageResult<Box<dyn ReleaseTxn>>;

    async fn get_release(&self, id: &ReleaseId) -> StorageResult<Option<ReleaseRecord>>;

    async fn get_version_release(
        &self,
        id: &VersionReleaseId,
    ) -> StorageResult<Option<VersionReleaseRecord>>;

    async fn get_variable_release(
        &self,
        id: &VariableSetReleaseId,
    ) -> StorageResult<Option<VariableSetReleaseRecord>>;

    /// The newest release for a target.
    async fn latest_release(
        &self,
        release_target_id: &ReleaseTargetId,
    ) -> StorageResult<Option<ReleaseRecord>>;

    /// Version of the newest job on this target that is successful or in
    /// progress.
    async fn latest_deployed_version(
        &self,
        release_target_id: &ReleaseTargetId,
    ) -> StorageResult<Option<DeploymentVersionId>>;

    /// Active (pending / in-progress / action-required) jobs on any of the
    /// given targets.
    async fn active_jobs(&self, release_target_ids: &[ReleaseTargetId])
        -> StorageResult<Vec<JobRecord>>;

    /// Jobs on a target, newest first.
    async fn jobs_for_target(
        &self,
        release_target_id: &ReleaseTargetId,
    ) -> StorageResult<Vec<JobRecord>>;

    async fn get_job(&self, id: &JobId) -> StorageResult<JobRecord>;

    /// Apply a status callback to a job. See [`JobRecord::apply_update`].
    async fn update_job(&self, id: &JobId, update: JobUpdate) -> StorageResult<JobRecord>;
}

/// Write unit scoped to a single release target.
///
/// Reads observe committed rows plus this unit's own staged inserts.
/// Dropping the unit without `commit` discards staged inserts.
#[async_trait]
pub trait ReleaseTxn: Send {
    fn release_target_id(&self) -> ReleaseTargetId;

    async fn latest_version_release(&mut self) -> StorageResult<Option<VersionReleaseRecord>>;

    async fn latest_variable_release(&mut self)
        -> StorageResult<Option<VariableSetReleaseRecord>>;

    async fn find_release(
        &mut self,
        version_release_id: &VersionReleaseId,
        variable_release_id: &VariableSetReleaseId,
    ) -> StorageResult<Option<ReleaseRecord>>;

    async fn job_for_release(&mut self, release_id: &ReleaseId) -> StorageResult<Option<JobRecord>>;

    fn insert_version_release(&mut self, record: VersionReleaseRecord);

    fn insert_variable_release(&mut self, record: VariableSetReleaseRecord);

    fn insert_release(&mut self, record: ReleaseRecord);

    fn insert_job(&mut self, record: JobRecord);

    /// Atomically persist every staged insert.
    ///
    /// Fails with `TargetNotVisible` if the target disappeared, or
    /// `Conflict` if a uniqueness key was taken by a concurrent writer.
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
