//! SurrealDB-backed implementation of the release storage traits.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Datetime as SurrealDatetime;
use tracing::{debug, instrument};

use crate::error::StorageError;
use crate::ids::*;
use crate::records::*;
use crate::storage_traits::*;
use crate::SurrealHandle;

fn parse_id<T>(raw: &str) -> StorageResult<T>
where
    T: FromStr<Err = uuid::Error>,
{
    raw.parse()
        .map_err(|e: uuid::Error| StorageError::Backend(format!("corrupt id '{}': {}", raw, e)))
}

fn parse_opt_id<T>(raw: Option<&str>) -> StorageResult<Option<T>>
where
    T: FromStr<Err = uuid::Error>,
{
    raw.map(parse_id).transpose()
}

/// Map the per-statement errors of a failed transaction to one storage error.
///
/// Statements after the failing one report a generic "not executed" error,
/// so every message is inspected.
fn classify_errors(errors: impl IntoIterator<Item = surrealdb::Error>) -> StorageError {
    let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
    if let Some(m) = messages.iter().find(|m| m.contains("target_not_visible")) {
        return StorageError::TargetNotVisible { id: m.clone() };
    }
    if let Some(m) = messages.iter().find(|m| m.contains("already contains")) {
        return StorageError::Conflict { detail: m.clone() };
    }
    StorageError::Backend(messages.join("; "))
}

// ---------------------------------------------------------------------------
// Row shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbReleaseTarget {
    target_id: String,
    resource_id: String,
    environment_id: String,
    deployment_id: String,
    desired_release_id: Option<String>,
    created_at: SurrealDatetime,
}

impl From<&ReleaseTargetRecord> for DbReleaseTarget {
    fn from(r: &ReleaseTargetRecord) -> Self {
        Self {
            target_id: r.id.to_string(),
            resource_id: r.resource_id.to_string(),
            environment_id: r.environment_id.to_string(),
            deployment_id: r.deployment_id.to_string(),
            desired_release_id: r.desired_release_id.map(|id| id.to_string()),
            created_at: SurrealDatetime::from(r.created_at),
        }
    }
}

impl DbReleaseTarget {
    fn into_record(self) -> StorageResult<ReleaseTargetRecord> {
        Ok(ReleaseTargetRecord {
            id: parse_id(&self.target_id)?,
            resource_id: parse_id(&self.resource_id)?,
            environment_id: parse_id(&self.environment_id)?,
            deployment_id: parse_id(&self.deployment_id)?,
            desired_release_id: parse_opt_id(self.desired_release_id.as_deref())?,
            created_at: DateTime::<Utc>::from(self.created_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbVersionRelease {
    version_release_id: String,
    release_target_id: String,
    version_id: String,
    created_at: SurrealDatetime,
}

impl From<&VersionReleaseRecord> for DbVersionRelease {
    fn from(r: &VersionReleaseRecord) -> Self {
        Self {
            version_release_id: r.id.to_string(),
            release_target_id: r.release_target_id.to_string(),
            version_id: r.version_id.to_string(),
            created_at: SurrealDatetime::from(r.created_at),
        }
    }
}

impl DbVersionRelease {
    fn into_record(self) -> StorageResult<VersionReleaseRecord> {
        Ok(VersionReleaseRecord {
            id: parse_id(&self.version_release_id)?,
            release_target_id: parse_id(&self.release_target_id)?,
            version_id: parse_id(&self.version_id)?,
            created_at: DateTime::<Utc>::from(self.created_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbVariableRelease {
    variable_release_id: String,
    release_target_id: String,
    values: Vec<VariableSnapshot>,
    created_at: SurrealDatetime,
}

impl From<&VariableSetReleaseRecord> for DbVariableRelease {
    fn from(r: &VariableSetReleaseRecord) -> Self {
        Self {
            variable_release_id: r.id.to_string(),
            release_target_id: r.release_target_id.to_string(),
            values: r.values.clone(),
            created_at: SurrealDatetime::from(r.created_at),
        }
    }
}

impl DbVariableRelease {
    fn into_record(self) -> StorageResult<VariableSetReleaseRecord> {
        Ok(VariableSetReleaseRecord {
            id: parse_id(&self.variable_release_id)?,
            release_target_id: parse_id(&self.release_target_id)?,
            values: self.values,
            created_at: DateTime::<Utc>::from(self.created_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbRelease {
    release_id: String,
    release_target_id: String,
    version_release_id: String,
    variable_release_id: String,
    created_at: SurrealDatetime,
}

impl From<&ReleaseRecord> for DbRelease {
    fn from(r: &ReleaseRecord) -> Self {
        Self {
            release_id: r.id.to_string(),
            release_target_id: r.release_target_id.to_string(),
            version_release_id: r.version_release_id.to_string(),
            variable_release_id: r.variable_release_id.to_string(),
            created_at: SurrealDatetime::from(r.created_at),
        }
    }
}

impl DbRelease {
    fn into_record(self) -> StorageResult<ReleaseRecord> {
        Ok(ReleaseRecord {
            id: parse_id(&self.release_id)?,
            release_target_id: parse_id(&self.release_target_id)?,
            version_release_id: parse_id(&self.version_release_id)?,
            variable_release_id: parse_id(&self.variable_release_id)?,
            created_at: DateTime::<Utc>::from(self.created_at),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbJob {
    job_id: String,
    release_id: String,
    release_target_id: String,
    job_agent_id: Option<String>,
    job_agent_config: serde_json::Value,
    status: String,
    external_id: Option<String>,
    message: Option<String>,
    created_at: SurrealDatetime,
    updated_at: SurrealDatetime,
    started_at: Option<SurrealDatetime>,
    completed_at: Option<SurrealDatetime>,
}

impl From<&JobRecord> for DbJob {
    fn from(j: &JobRecord) -> Self {
        Self {
            job_id: j.id.to_string(),
            release_id: j.release_id.to_string(),
            release_target_id: j.release_target_id.to_string(),
            job_agent_id: j.job_agent_id.map(|id| id.to_string()),
            job_agent_config: j.job_agent_config.clone(),
            status: j.status.as_str().to_string(),
            external_id: j.external_id.clone(),
            message: j.message.clone(),
            created_at: SurrealDatetime::from(j.created_at),
            updated_at: SurrealDatetime::from(j.updated_at),
            started_at: j.started_at.map(SurrealDatetime::from),
            completed_at: j.completed_at.map(SurrealDatetime::from),
        }
    }
}

impl DbJob {
    fn into_record(self) -> StorageResult<JobRecord> {
        Ok(JobRecord {
            id: parse_id(&self.job_id)?,
            release_id: parse_id(&self.release_id)?,
            release_target_id: parse_id(&self.release_target_id)?,
            job_agent_id: parse_opt_id(self.job_agent_id.as_deref())?,
            job_agent_config: self.job_agent_config,
            status: self.status.parse().map_err(StorageError::Backend)?,
            external_id: self.external_id,
            message: self.message,
            created_at: DateTime::<Utc>::from(self.created_at),
            updated_at: DateTime::<Utc>::from(self.updated_at),
            started_at: self.started_at.map(DateTime::<Utc>::from),
            completed_at: self.completed_at.map(DateTime::<Utc>::from),
        })
    }
}

fn collect<D, R>(rows: Vec<D>, convert: fn(D) -> StorageResult<R>) -> StorageResult<Vec<R>> {
    rows.into_iter().map(convert).collect()
}

fn status_strings(statuses: &[JobStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

// ---------------------------------------------------------------------------
// SurrealReleaseStore
// ---------------------------------------------------------------------------

/// SurrealDB-backed implementation of [`ReleaseTargetStore`] and [`ReleaseStore`].
#[derive(Clone)]
pub struct SurrealReleaseStore {
    handle: Arc<SurrealHandle>,
}

impl SurrealReleaseStore {
    pub fn new(handle: Arc<SurrealHandle>) -> Self {
        Self { handle }
    }

    async fn select_targets(
        &self,
        sql: &'static str,
        binds: Vec<(&'static str, String)>,
    ) -> StorageResult<Vec<ReleaseTargetRecord>> {
        let mut query = self.handle.db().query(sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let mut result = query.await?;
        let rows: Vec<DbReleaseTarget> = result.take(0)?;
        collect(rows, DbReleaseTarget::into_record)
    }

    async fn find_by_identity(
        &self,
        resource_id: ResourceId,
        environment_id: EnvironmentId,
        deployment_id: DeploymentId,
    ) -> StorageResult<Option<ReleaseTargetRecord>> {
        let rows = self
            .select_targets(
                "SELECT * FROM release_targets WHERE resource_id = $resource \
                 AND environment_id = $environment AND deployment_id = $deployment",
                vec![
                    ("resource", resource_id.to_string()),
                    ("environment", environment_id.to_string()),
                    ("deployment", deployment_id.to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl ReleaseTargetStore for SurrealReleaseStore {
    #[instrument(skip(self), fields(resource = %resource_id, environment = %environment_id, deployment = %deployment_id))]
    async fn upsert_target(
        &self,
        resource_id: ResourceId,
        environment_id: EnvironmentId,
        deployment_id: DeploymentId,
    ) -> StorageResult<(ReleaseTargetRecord, bool)> {
        if let Some(existing) = self
            .find_by_identity(resource_id, environment_id, deployment_id)
            .await?
        {
            return Ok((existing, false));
        }

        let record = ReleaseTargetRecord::new(resource_id, environment_id, deployment_id);
        let created: StorageResult<Option<DbReleaseTarget>> = self
            .handle
            .db()
            .create("release_targets")
            .content(DbReleaseTarget::from(&record))
            .await
            .map_err(StorageError::from);

        match created {
            Ok(Some(row)) => Ok((row.into_record()?, true)),
            Ok(None) => Err(StorageError::Backend(
                "failed to create release target".to_string(),
            )),
            // Lost the race on the identity index; the winner's row is visible now.
            Err(StorageError::Conflict { detail }) => self
                .find_by_identity(resource_id, environment_id, deployment_id)
                .await?
                .map(|existing| (existing, false))
                .ok_or(StorageError::Conflict { detail }),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(release_target_id = %id))]
    async fn get_target(&self, id: &ReleaseTargetId) -> StorageResult<Option<ReleaseTargetRecord>> {
        let rows = self
            .select_targets(
                "SELECT * FROM release_targets WHERE target_id = $id",
                vec![("id", id.to_string())],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    #[instrument(skip(self), fields(release_target_id = %id))]
    async fn delete_target(&self, id: &ReleaseTargetId) -> StorageResult<bool> {
        if self.get_target(id).await?.is_none() {
            return Ok(false);
        }

        let mut result = self
            .handle
            .db()
            .query(
                "BEGIN TRANSACTION;
                 DELETE jobs WHERE release_target_id = $id;
                 DELETE releases WHERE release_target_id = $id;
                 DELETE version_releases WHERE release_target_id = $id;
                 DELETE variable_releases WHERE release_target_id = $id;
                 DELETE release_targets WHERE target_id = $id;
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .await?;

        let errors = result.take_errors();
        if !errors.is_empty() {
            return Err(classify_errors(errors.into_values()));
        }
        debug!("release target deleted with its history");
        Ok(true)
    }

    async fn list_targets(&self) -> StorageResult<Vec<ReleaseTargetRecord>> {
        self.select_targets("SELECT * FROM release_targets ORDER BY created_at", vec![])
            .await
    }

    async fn targets_for_environment(
        &self,
        environment_id: &EnvironmentId,
    ) -> StorageResult<Vec<ReleaseTargetRecord>> {
        self.select_targets(
            "SELECT * FROM release_targets WHERE environment_id = $environment",
            vec![("environment", environment_id.to_string())],
        )
        .await
    }

    async fn targets_for_cohort(
        &self,
        deployment_id: &DeploymentId,
        environment_id: &EnvironmentId,
    ) -> StorageResult<Vec<ReleaseTargetRecord>> {
        self.select_targets(
            "SELECT * FROM release_targets WHERE deployment_id = $deployment \
             AND environment_id = $environment",
            vec![
                ("deployment", deployment_id.to_string()),
                ("environment", environment_id.to_string()),
            ],
        )
        .await
    }

    async fn targets_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> StorageResult<Vec<ReleaseTargetRecord>> {
        self.select_targets(
            "SELECT * FROM release_targets WHERE resource_id = $resource",
            vec![("resource", resource_id.to_string())],
        )
        .await
    }

    #[instrument(skip(self), fields(release_target_id = %id))]
    async fn set_desired_release(
        &self,
        id: &ReleaseTargetId,
        release_id: Option<ReleaseId>,
    ) -> StorageResult<ReleaseTargetRecord> {
        if let Some(release_id) = release_id {
            let owned = self
                .get_release(&release_id)
                .await?
                .is_some_and(|r| r.release_target_id == *id);
            if !owned {
                return Err(StorageError::ReleaseNotFound {
                    id: release_id.to_string(),
                });
            }
        }

        let mut result = self
            .handle
            .db()
            .query("UPDATE release_targets SET desired_release_id = $release WHERE target_id = $id RETURN AFTER")
            .bind(("release", release_id.map(|r| r.to_string())))
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<DbReleaseTarget> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::TargetNotFound { id: id.to_string() })?
            .into_record()
    }
}

#[async_trait]
impl ReleaseStore for SurrealReleaseStore {
    async fn begin(&self, release_target_id: &ReleaseTargetId) -> StorageResult<Box<dyn ReleaseTxn>> {
        if self.get_target(release_target_id).await?.is_none() {
            return Err(StorageError::TargetNotVisible {
                id: release_target_id.to_string(),
            });
        }
        Ok(Box::new(SurrealReleaseTxn {
            handle: Arc::clone(&self.handle),
            release_target_id: *release_target_id,
            staged: Staged::default(),
        }))
    }

    async fn get_release(&self, id: &ReleaseId) -> StorageResult<Option<ReleaseRecord>> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM releases WHERE release_id = $id")
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<DbRelease> = result.take(0)?;
        rows.into_iter().next().map(DbRelease::into_record).transpose()
    }

    async fn get_version_release(
        &self,
        id: &VersionReleaseId,
    ) -> StorageResult<Option<VersionReleaseRecord>> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM version_releases WHERE version_release_id = $id")
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<DbVersionRelease> = result.take(0)?;
        rows.into_iter()
            .next()
            .map(DbVersionRelease::into_record)
            .transpose()
    }

    async fn get_variable_release(
        &self,
        id: &VariableSetReleaseId,
    ) -> StorageResult<Option<VariableSetReleaseRecord>> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM variable_releases WHERE variable_release_id = $id")
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<DbVariableRelease> = result.take(0)?;
        rows.into_iter()
            .next()
            .map(DbVariableRelease::into_record)
            .transpose()
    }

    async fn latest_release(
        &self,
        release_target_id: &ReleaseTargetId,
    ) -> StorageResult<Option<ReleaseRecord>> {
        let mut result = self
            .handle
            .db()
            .query(
                "SELECT * FROM releases WHERE release_target_id = $target \
                 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(("target", release_target_id.to_string()))
            .await?;
        let rows: Vec<DbRelease> = result.take(0)?;
        rows.into_iter().next().map(DbRelease::into_record).transpose()
    }

    #[instrument(skip(self), fields(release_target_id = %release_target_id))]
    async fn latest_deployed_version(
        &self,
        release_target_id: &ReleaseTargetId,
    ) -> StorageResult<Option<DeploymentVersionId>> {
        let mut result = self
            .handle
            .db()
            .query(
                "SELECT * FROM jobs WHERE release_target_id = $target AND status IN $statuses \
                 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(("target", release_target_id.to_string()))
            .bind(("statuses", status_strings(&JobStatus::DEPLOYED)))
            .await?;
        let jobs: Vec<DbJob> = result.take(0)?;
        let Some(job) = jobs.into_iter().next() else {
            return Ok(None);
        };
        let job = job.into_record()?;

        let Some(release) = self.get_release(&job.release_id).await? else {
            return Ok(None);
        };
        Ok(self
            .get_version_release(&release.version_release_id)
            .await?
            .map(|vr| vr.version_id))
    }

    async fn active_jobs(
        &self,
        release_target_ids: &[ReleaseTargetId],
    ) -> StorageResult<Vec<JobRecord>> {
        let targets: Vec<String> = release_target_ids.iter().map(|t| t.to_string()).collect();
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM jobs WHERE release_target_id IN $targets AND status IN $statuses")
            .bind(("targets", targets))
            .bind(("statuses", status_strings(&JobStatus::ACTIVE)))
            .await?;
        let rows: Vec<DbJob> = result.take(0)?;
        collect(rows, DbJob::into_record)
    }

    async fn jobs_for_target(
        &self,
        release_target_id: &ReleaseTargetId,
    ) -> StorageResult<Vec<JobRecord>> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM jobs WHERE release_target_id = $target ORDER BY created_at DESC")
            .bind(("target", release_target_id.to_string()))
            .await?;
        let rows: Vec<DbJob> = result.take(0)?;
        collect(rows, DbJob::into_record)
    }

    async fn get_job(&self, id: &JobId) -> StorageResult<JobRecord> {
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM jobs WHERE job_id = $id")
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<DbJob> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::JobNotFound { id: id.to_string() })?
            .into_record()
    }

    #[instrument(skip(self, update), fields(job_id = %id, status = %update.status))]
    async fn update_job(&self, id: &JobId, update: JobUpdate) -> StorageResult<JobRecord> {
        let mut job = self.get_job(id).await?;
        job.apply_update(&update, Utc::now())?;

        let mut result = self
            .handle
            .db()
            .query("UPDATE jobs MERGE $row WHERE job_id = $id RETURN AFTER")
            .bind(("row", DbJob::from(&job)))
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<DbJob> = result.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::JobNotFound { id: id.to_string() })?
            .into_record()
    }
}

// ---------------------------------------------------------------------------
// SurrealReleaseTxn
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Staged {
    version_releases: Vec<VersionReleaseRecord>,
    variable_releases: Vec<VariableSetReleaseRecord>,
    releases: Vec<ReleaseRecord>,
    jobs: Vec<JobRecord>,
}

impl Staged {
    fn is_empty(&self) -> bool {
        self.version_releases.is_empty()
            && self.variable_releases.is_empty()
            && self.releases.is_empty()
            && self.jobs.is_empty()
    }
}

/// Buffers inserts and writes them in one `BEGIN .. COMMIT` block.
struct SurrealReleaseTxn {
    handle: Arc<SurrealHandle>,
    release_target_id: ReleaseTargetId,
    staged: Staged,
}

impl SurrealReleaseTxn {
    fn target(&self) -> String {
        self.release_target_id.to_string()
    }
}

#[async_trait]
impl ReleaseTxn for SurrealReleaseTxn {
    fn release_target_id(&self) -> ReleaseTargetId {
        self.release_target_id
    }

    async fn latest_version_release(&mut self) -> StorageResult<Option<VersionReleaseRecord>> {
        if let Some(staged) = self.staged.version_releases.last() {
            return Ok(Some(staged.clone()));
        }
        let mut result = self
            .handle
            .db()
            .query(
                "SELECT * FROM version_releases WHERE release_target_id = $target \
                 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(("target", self.target()))
            .await?;
        let rows: Vec<DbVersionRelease> = result.take(0)?;
        rows.into_iter()
            .next()
            .map(DbVersionRelease::into_record)
            .transpose()
    }

    async fn latest_variable_release(
        &mut self,
    ) -> StorageResult<Option<VariableSetReleaseRecord>> {
        if let Some(staged) = self.staged.variable_releases.last() {
            return Ok(Some(staged.clone()));
        }
        let mut result = self
            .handle
            .db()
            .query(
                "SELECT * FROM variable_releases WHERE release_target_id = $target \
                 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(("target", self.target()))
            .await?;
        let rows: Vec<DbVariableRelease> = result.take(0)?;
        rows.into_iter()
            .next()
            .map(DbVariableRelease::into_record)
            .transpose()
    }

    async fn find_release(
        &mut self,
        version_release_id: &VersionReleaseId,
        variable_release_id: &VariableSetReleaseId,
    ) -> StorageResult<Option<ReleaseRecord>> {
        if let Some(staged) = self.staged.releases.iter().find(|r| {
            r.version_release_id == *version_release_id
                && r.variable_release_id == *variable_release_id
        }) {
            return Ok(Some(staged.clone()));
        }
        let mut result = self
            .handle
            .db()
            .query(
                "SELECT * FROM releases WHERE version_release_id = $vr \
                 AND variable_release_id = $varr",
            )
            .bind(("vr", version_release_id.to_string()))
            .bind(("varr", variable_release_id.to_string()))
            .await?;
        let rows: Vec<DbRelease> = result.take(0)?;
        rows.into_iter().next().map(DbRelease::into_record).transpose()
    }

    async fn job_for_release(&mut self, release_id: &ReleaseId) -> StorageResult<Option<JobRecord>> {
        if let Some(staged) = self.staged.jobs.iter().find(|j| j.release_id == *release_id) {
            return Ok(Some(staged.clone()));
        }
        let mut result = self
            .handle
            .db()
            .query("SELECT * FROM jobs WHERE release_id = $release")
            .bind(("release", release_id.to_string()))
            .await?;
        let rows: Vec<DbJob> = result.take(0)?;
        rows.into_iter().next().map(DbJob::into_record).transpose()
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

    #[instrument(skip(self), fields(release_target_id = %self.release_target_id))]
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let mut sql = String::from(
            "BEGIN TRANSACTION;
             IF array::len((SELECT target_id FROM release_targets WHERE target_id = $target)) = 0 {
                 THROW \"target_not_visible\";
             };\n",
        );
        for i in 0..self.staged.version_releases.len() {
            sql.push_str(&format!("CREATE version_releases CONTENT $vr{i};\n"));
        }
        for i in 0..self.staged.variable_releases.len() {
            sql.push_str(&format!("CREATE variable_releases CONTENT $varr{i};\n"));
        }
        for i in 0..self.staged.releases.len() {
            sql.push_str(&format!("CREATE releases CONTENT $rel{i};\n"));
        }
        for i in 0..self.staged.jobs.len() {
            sql.push_str(&format!("CREATE jobs CONTENT $job{i};\n"));
        }
        sql.push_str("COMMIT TRANSACTION;");

        let mut query = self.handle.db().query(sql).bind(("target", self.target()));
        for (i, r) in self.staged.version_releases.iter().enumerate() {
            query = query.bind((format!("vr{i}"), DbVersionRelease::from(r)));
        }
        for (i, r) in self.staged.variable_releases.iter().enumerate() {
            query = query.bind((format!("varr{i}"), DbVariableRelease::from(r)));
        }
        for (i, r) in self.staged.releases.iter().enumerate() {
            query = query.bind((format!("rel{i}"), DbRelease::from(r)));
        }
        for (i, j) in self.staged.jobs.iter().enumerate() {
            query = query.bind((format!("job{i}"), DbJob::from(j)));
        }

        let mut response = query.await?;
        let errors = response.take_errors();
        if !errors.is_empty() {
            return Err(classify_errors(errors.into_values()));
        }
        debug!("release transaction committed");
        Ok(())
    }
}
