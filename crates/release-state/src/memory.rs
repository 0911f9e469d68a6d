//! In-memory backend for the storage traits
//!
//! `MemoryReleaseStore` keeps every table behind one mutex so a
//! [`ReleaseTxn`] commit is applied as a single step.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::ids::*;
use crate::records::*;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct Tables {
    targets: BTreeMap<ReleaseTargetId, ReleaseTargetRecord>,
    // Append-only, insertion order is chronological.
    version_releases: Vec<VersionReleaseRecord>,
    variable_releases: Vec<VariableSetReleaseRecord>,
    releases: Vec<ReleaseRecord>,
    jobs: Vec<JobRecord>,
}

fn lock(tables: &Mutex<Tables>) -> StorageResult<MutexGuard<'_, Tables>> {
    tables
        .lock()
        .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))
}

/// In-memory release-target, release and job store.
#[derive(Debug, Default, Clone)]
pub struct MemoryReleaseStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a target row directly, bypassing identity upsert (fixtures).
    pub fn insert_target(&self, record: ReleaseTargetRecord) -> StorageResult<()> {
        let mut tables = lock(&self.tables)?;
        tables.targets.insert(record.id, record);
        Ok(())
    }

    /// Number of release rows (all targets).
    pub fn release_count(&self) -> StorageResult<usize> {
        Ok(lock(&self.tables)?.releases.len())
    }

    /// Number of job rows (all targets).
    pub fn job_count(&self) -> StorageResult<usize> {
        Ok(lock(&self.tables)?.jobs.len())
    }
}

#[async_trait]
impl ReleaseTargetStore for MemoryReleaseStore {
    async fn upsert_target(
        &self,
        resource_id: ResourceId,
        environment_id: EnvironmentId,
        deployment_id: DeploymentId,
    ) -> StorageResult<(ReleaseTargetRecord, bool)> {
        let mut tables = lock(&self.tables)?;
        let key = (resource_id, environment_id, deployment_id);
        if let Some(existing) = tables.targets.values().find(|t| t.identity() == key) {
            return Ok((existing.clone(), false));
        }
        let record = ReleaseTargetRecord::new(resource_id, environment_id, deployment_id);
        tables.targets.insert(record.id, record.clone());
        Ok((record, true))
    }

    async fn get_target(&self, id: &ReleaseTargetId) -> StorageResult<Option<ReleaseTargetRecord>> {
        Ok(lock(&self.tables)?.targets.get(id).cloned())
    }

    async fn delete_target(&self, id: &ReleaseTargetId) -> StorageResult<bool> {
        let mut tables = lock(&self.tables)?;
        if tables.targets.remove(id).is_none() {
            return Ok(false);
        }
        tables.jobs.retain(|j| j.release_target_id != *id);
        tables.releases.retain(|r| r.release_target_id != *id);
        tables.version_releases.retain(|r| r.release_target_id != *id);
        tables.variable_releases.retain(|r| r.release_target_id != *id);
        Ok(true)
    }

    async fn list_targets(&self) -> StorageResult<Vec<ReleaseTargetRecord>> {
        Ok(lock(&self.tables)?.targets.values().cloned().collect())
    }

    async fn targets_for_environment(
        &self,
        environment_id: &EnvironmentId,
    ) -> StorageResult<Vec<ReleaseTargetRecord>> {
        let tables = lock(&self.tables)?;
        Ok(tables
            .targets
            .values()
            .filter(|t| t.environment_id == *environment_id)
            .cloned()
            .collect())
    }

    async fn targets_for_cohort(
        &self,
        deployment_id: &DeploymentId,
        environment_id: &EnvironmentId,
    ) -> StorageResult<Vec<ReleaseTargetRecord>> {
        let tables = lock(&self.tables)?;
        Ok(tables
            .targets
            .values()
            .filter(|t| t.deployment_id == *deployment_id && t.environment_id == *environment_id)
            .cloned()
            .collect())
    }

    async fn targets_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> StorageResult<Vec<ReleaseTargetRecord>> {
        let tables = lock(&self.tables)?;
        Ok(tables
            .targets
            .values()
            .filter(|t| t.resource_id == *resource_id)
            .cloned()
            .collect())
    }

    async fn set_desired_release(
        &self,
        id: &ReleaseTargetId,
        release_id: Option<ReleaseId>,
    ) -> StorageResult<ReleaseTargetRecord> {
        let mut tables = lock(&self.tables)?;
        if let Some(release_id) = release_id {
            let owned = tables
                .releases
                .iter()
                .any(|r| r.id == release_id && r.release_target_id == *id);
            if !owned {
                return Err(StorageError::ReleaseNotFound {
                    id: release_id.to_string(),
                });
            }
        }
        let target = tables
            .targets
            .get_mut(id)
            .ok_or_else(|| StorageError::TargetNotFound { id: id.to_string() })?;
        target.desired_release_id = release_id;
        Ok(target.clone())
    }
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    async fn begin(&self, release_target_id: &ReleaseTargetId) -> StorageResult<Box<dyn ReleaseTxn>> {
        if !lock(&self.tables)?.targets.contains_key(release_target_id) {
            return Err(StorageError::TargetNotVisible {
                id: release_target_id.to_string(),
            });
        }
        Ok(Box::new(MemoryReleaseTxn {
            tables: Arc::clone(&self.tables),
            release_target_id: *release_target_id,
            staged: Staged::default(),
        }))
    }

    async fn get_release(&self, id: &ReleaseId) -> StorageResult<Option<ReleaseRecord>> {
        let tables = lock(&self.tables)?;
        Ok(tables.releases.iter().find(|r| r.id == *id).cloned())
    }

    async fn get_version_release(
        &self,
        id: &VersionReleaseId,
    ) -> StorageResult<Option<VersionReleaseRecord>> {
        let tables = lock(&self.tables)?;
        Ok(tables.version_releases.iter().find(|r| r.id == *id).cloned())
    }

    async fn get_variable_release(
        &self,
        id: &VariableSetReleaseId,
    ) -> StorageResult<Option<VariableSetReleaseRecord>> {
        let tables = lock(&self.tables)?;
        Ok(tables.variable_releases.iter().find(|r| r.id == *id).cloned())
    }

    async fn latest_release(
        &self,
        release_target_id: &ReleaseTargetId,
    ) -> StorageResult<Option<ReleaseRecord>> {
        let tables = lock(&self.tables)?;
        Ok(tables
            .releases
            .iter()
            .rev()
            .find(|r| r.release_target_id == *release_target_id)
            .cloned())
    }

    async fn latest_deployed_version(
        &self,
        release_target_id: &ReleaseTargetId,
    ) -> StorageResult<Option<DeploymentVersionId>> {
        let tables = lock(&self.tables)?;
        let job = tables
            .jobs
            .iter()
            .rev()
            .find(|j| j.release_target_id == *release_target_id && j.status.is_deployed());
        let Some(job) = job else {
            return Ok(None);
        };
        let version = tables
            .releases
            .iter()
            .find(|r| r.id == job.release_id)
            .and_then(|release| {
                tables
                    .version_releases
                    .iter()
                    .find(|vr| vr.id == release.version_release_id)
            })
            .map(|vr| vr.version_id);
        Ok(version)
    }

    async fn active_jobs(
        &self,
        release_target_ids: &[ReleaseTargetId],
    ) -> StorageResult<Vec<JobRecord>> {
        let tables = lock(&self.tables)?;
        Ok(tables
            .jobs
            .iter()
            .filter(|j| j.status.is_active() && release_target_ids.contains(&j.release_target_id))
            .cloned()
            .collect())
    }

    async fn jobs_for_target(
        &self,
        release_target_id: &ReleaseTargetId,
    ) -> StorageResult<Vec<JobRecord>> {
        let tables = lock(&self.tables)?;
        Ok(tables
            .jobs
            .iter()
            .rev()
            .filter(|j| j.release_target_id == *release_target_id)
            .cloned()
            .collect())
    }

    async fn get_job(&self, id: &JobId) -> StorageResult<JobRecord> {
        let tables = lock(&self.tables)?;
        tables
            .jobs
            .iter()
            .find(|j| j.id == *id)
            .cloned()
            .ok_or_else(|| StorageError::JobNotFound { id: id.to_string() })
    }

    async fn update_job(&self, id: &JobId, update: JobUpdate) -> StorageResult<JobRecord> {
        let mut tables = lock(&self.tables)?;
        let job = tables
            .jobs
            .iter_mut()
            .find(|j| j.id == *id)
            .ok_or_else(|| StorageError::JobNotFound { id: id.to_string() })?;
        job.apply_update(&update, Utc::now())?;
        Ok(job.clone())
    }
}

// ---------------------------------------------------------------------------
// MemoryReleaseTxn
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Staged {
    version_releases: Vec<VersionReleaseRecord>,
    variable_releases: Vec<VariableSetReleaseRecord>,
    releases: Vec<ReleaseRecord>,
    jobs: Vec<JobRecord>,
}

#[derive(Debug)]
struct MemoryReleaseTxn {
    tables: Arc<Mutex<Tables>>,
    release_target_id: ReleaseTargetId,
    staged: Staged,
}

#[async_trait]
impl ReleaseTxn for MemoryReleaseTxn {
    fn release_target_id(&self) -> ReleaseTargetId {
        self.release_target_id
    }

    async fn latest_version_release(&mut self) -> StorageResult<Option<VersionReleaseRecord>> {
        if let Some(staged) = self.staged.version_releases.last() {
            return Ok(Some(staged.clone()));
        }
        let tables = lock(&self.tables)?;
        Ok(tables
            .version_releases
            .iter()
            .rev()
            .find(|r| r.release_target_id == self.release_target_id)
            .cloned())
    }

    async fn latest_variable_release(
        &mut self,
    ) -> StorageResult<Option<VariableSetReleaseRecord>> {
        if let Some(staged) = self.staged.variable_releases.last() {
            return Ok(Some(staged.clone()));
        }
        let tables = lock(&self.tables)?;
        Ok(tables
            .variable_releases
            .iter()
            .rev()
            .find(|r| r.release_target_id == self.release_target_id)
            .cloned())
    }

    async fn find_release(
        &mut self,
        version_release_id: &VersionReleaseId,
        variable_release_id: &VariableSetReleaseId,
    ) -> StorageResult<Option<ReleaseRecord>> {
        let matches = |r: &&ReleaseRecord| {
            r.version_release_id == *version_release_id
                && r.variable_release_id == *variable_release_id
        };
        if let Some(staged) = self.staged.releases.iter().find(matches) {
            return Ok(Some(staged.clone()));
        }
        let tables = lock(&self.tables)?;
        Ok(tables.releases.iter().find(matches).cloned())
    }

    async fn job_for_release(&mut self, release_id: &ReleaseId) -> StorageResult<Option<JobRecord>> {
        if let Some(staged) = self.staged.jobs.iter().find(|j| j.release_id == *release_id) {
            return Ok(Some(staged.clone()));
        }
        let tables = lock(&self.tables)?;
        Ok(tables
            .jobs
            .iter()
            .rev()
            .find(|j| j.release_id == *release_id)
            .cloned())
    }

    fn insert_version_release(&mut self, record: VersionReleaseRecord) {
        self.staged.version_releases.push(record);
    }

    fn insert_variable_release(&mut self, record: VariableSetReleaseRecord) {
        self.staged.variable_releases.push(record);
    }

    fn insert_release(&mut self, record: ReleaseRecord) {
        self.staged.releases.push(record);
    }

    fn insert_job(&mut self, record: JobRecord) {
        self.staged.jobs.push(record);
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let MemoryReleaseTxn {
            tables,
            release_target_id,
            staged,
        } = *self;
        let mut tables = lock(&tables)?;

        if !tables.targets.contains_key(&release_target_id) {
            return Err(StorageError::TargetNotVisible {
                id: release_target_id.to_string(),
            });
        }
        for release in &staged.releases {
            let taken = tables.releases.iter().any(|r| {
                r.version_release_id == release.version_release_id
                    && r.variable_release_id == release.variable_release_id
            });
            if taken {
                return Err(StorageError::Conflict {
                    detail: format!(
                        "release for ({}, {}) already exists",
                        release.version_release_id, release.variable_release_id
                    ),
                });
            }
        }
        for job in &staged.jobs {
            if tables.jobs.iter().any(|j| j.release_id == job.release_id) {
                return Err(StorageError::Conflict {
                    detail: format!("job for release {} already exists", job.release_id),
                });
            }
        }

        tables.version_releases.extend(staged.version_releases);
        tables.variable_releases.extend(staged.variable_releases);
        tables.releases.extend(staged.releases);
        tables.jobs.extend(staged.jobs);
        Ok(())
    }
}
