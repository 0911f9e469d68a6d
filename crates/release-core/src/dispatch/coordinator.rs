//! The release engine: evaluates release targets end to end.
//!
//! One evaluation runs under a non-blocking per-target lease:
//! resolve policy, run the version and variable managers concurrently,
//! assemble the release and create its job in one write unit, commit, then
//! hand the job to the executor. Contention and not-yet-visible targets
//! are re-queued instead of retried inline.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use release_state::{
    DeploymentVersionId, JobId, JobRecord, JobStatus, JobUpdate, ReleaseId, ReleaseRecord,
    ReleaseStore, ReleaseTargetId, ReleaseTargetRecord, ReleaseTargetStore,
};
use serde::Serialize;
use tracing::{debug, warn};

use super::executor::JobExecutor;
use super::lease::LeaseTable;
use super::queue::{EvaluationQueue, EvaluationReceiver};
use crate::assembler::{upsert_release, upsert_variable_release, upsert_version_release};
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::domain::{DeploymentVersion, ReleaseTargetContext};
use crate::error::{ReleaseError, Result};
use crate::manager::{VariableDecision, VariableManager, VersionManager};
use crate::membership::ExitHook;
use crate::metrics::METRICS;
use crate::obs::{self, EvaluationSpan};
use crate::policy::PolicySnapshot;
use crate::rollout::RolloutStatus;
use crate::rules::RejectionReasons;

/// Result of evaluating one release target.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EvaluationOutcome {
    /// A release exists for the current decision and has a job.
    Released {
        release: ReleaseRecord,
        version: DeploymentVersion,
        job: JobRecord,
        release_created: bool,
        job_created: bool,
    },
    /// No version survived the rules. Not an error.
    NoCandidate {
        rejection_reasons: RejectionReasons<DeploymentVersionId>,
        blocked_by: Option<String>,
    },
    /// The target was busy or not yet visible; a re-evaluation is queued.
    Pending { reason: String },
}

impl EvaluationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            EvaluationOutcome::Released { .. } => "released",
            EvaluationOutcome::NoCandidate { .. } => "no_candidate",
            EvaluationOutcome::Pending { .. } => "pending",
        }
    }

    pub fn release(&self) -> Option<&ReleaseRecord> {
        match self {
            EvaluationOutcome::Released { release, .. } => Some(release),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, EvaluationOutcome::Pending { .. })
    }
}

pub struct ReleaseEngine {
    pub(crate) catalog: Arc<dyn Catalog>,
    pub(crate) targets: Arc<dyn ReleaseTargetStore>,
    pub(crate) releases: Arc<dyn ReleaseStore>,
    executor: Arc<dyn JobExecutor>,
    pub(crate) exit_hooks: Vec<Arc<dyn ExitHook>>,
    leases: LeaseTable,
    pub(crate) queue: EvaluationQueue,
    config: EngineConfig,
}

impl ReleaseEngine {
    /// Build an engine and the receiving half of its re-evaluation queue,
    /// to be driven by [`ReleaseEngine::run_until`].
    pub fn new(
        catalog: Arc<dyn Catalog>,
        targets: Arc<dyn ReleaseTargetStore>,
        releases: Arc<dyn ReleaseStore>,
        executor: Arc<dyn JobExecutor>,
        config: EngineConfig,
    ) -> (Self, EvaluationReceiver) {
        let (queue, receiver) = EvaluationQueue::new(config.queue_capacity);
        let engine = Self {
            catalog,
            targets,
            releases,
            executor,
            exit_hooks: Vec::new(),
            leases: LeaseTable::new(),
            queue,
            config,
        };
        (engine, receiver)
    }

    pub fn with_exit_hook(mut self, hook: Arc<dyn ExitHook>) -> Self {
        self.exit_hooks.push(hook);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.leases
    }

    pub fn queue(&self) -> &EvaluationQueue {
        &self.queue
    }

    pub async fn policy_snapshot(&self) -> Result<PolicySnapshot> {
        PolicySnapshot::fetch(self.catalog.as_ref()).await
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Evaluate one release target against `snapshot`.
    pub async fn evaluate(
        &self,
        id: ReleaseTargetId,
        snapshot: &PolicySnapshot,
    ) -> Result<EvaluationOutcome> {
        EvaluationSpan::new(&id)
            .instrument(self.evaluate_guarded(id, snapshot))
            .await
    }

    async fn evaluate_guarded(
        &self,
        id: ReleaseTargetId,
        snapshot: &PolicySnapshot,
    ) -> Result<EvaluationOutcome> {
        let started = Instant::now();
        METRICS.inc_evaluations();
        obs::emit_evaluation_started(&id);

        let Some(_lease) = self.leases.try_acquire(id) else {
            METRICS.inc_lease_contention();
            return Ok(self.requeue(id, "release target is being evaluated"));
        };

        let outcome = match self.evaluate_locked(id, snapshot).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_transient() => self.requeue(id, &err.to_string()),
            Err(err) => {
                obs::emit_evaluation_failed(&id, &err);
                return Err(err);
            }
        };
        obs::emit_evaluation_finished(&id, outcome.label(), started.elapsed().as_millis() as u64);
        Ok(outcome)
    }

    fn requeue(&self, id: ReleaseTargetId, reason: &str) -> EvaluationOutcome {
        if self.queue.enqueue(id) {
            METRICS.inc_requeues();
        }
        obs::emit_evaluation_requeued(&id, reason);
        EvaluationOutcome::Pending {
            reason: reason.to_string(),
        }
    }

    async fn get_target(&self, id: &ReleaseTargetId) -> Result<ReleaseTargetRecord> {
        self.targets
            .get_target(id)
            .await?
            .ok_or_else(|| ReleaseError::not_found("release target", id))
    }

    /// Assemble the read model for a target.
    pub async fn context(&self, target: ReleaseTargetRecord) -> Result<ReleaseTargetContext> {
        let (resource, environment, deployment) = tokio::try_join!(
            self.catalog.get_resource(&target.resource_id),
            self.catalog.get_environment(&target.environment_id),
            self.catalog.get_deployment(&target.deployment_id),
        )?;
        let resource = resource.ok_or_else(|| ReleaseError::not_found("resource", target.resource_id))?;
        let environment = environment
            .ok_or_else(|| ReleaseError::not_found("environment", target.environment_id))?;
        let deployment = deployment
            .ok_or_else(|| ReleaseError::not_found("deployment", target.deployment_id))?;
        Ok(ReleaseTargetContext::new(target, resource, environment, deployment))
    }

    async fn pinned_release(&self, target: &ReleaseTargetRecord) -> Result<Option<ReleaseRecord>> {
        let Some(release_id) = target.desired_release_id else {
            return Ok(None);
        };
        self.releases
            .get_release(&release_id)
            .await?
            .map(Some)
            .ok_or_else(|| ReleaseError::not_found("release", release_id))
    }

    async fn evaluate_locked(
        &self,
        id: ReleaseTargetId,
        snapshot: &PolicySnapshot,
    ) -> Result<EvaluationOutcome> {
        let target = self.get_target(&id).await?;
        let pin = self.pinned_release(&target).await?;
        let ctx = self.context(target).await?;
        let policy = snapshot.resolve(&ctx);
        let now = Utc::now();

        let versions = VersionManager::new(
            self.catalog.as_ref(),
            self.targets.as_ref(),
            self.releases.as_ref(),
            self.config.candidate_limit,
        );
        let variables = VariableManager::new(self.catalog.as_ref(), self.releases.as_ref());
        let (version_decision, variable_decision) = tokio::try_join!(
            versions.evaluate(&ctx, policy.as_ref(), pin.as_ref(), now),
            variables.evaluate(&ctx, pin.as_ref()),
        )?;

        let Some(version) = version_decision.chosen else {
            debug!(
                rejected = version_decision.rejection_reasons.len(),
                blocked_by = ?version_decision.blocked_by,
                "no eligible version"
            );
            return Ok(EvaluationOutcome::NoCandidate {
                rejection_reasons: version_decision.rejection_reasons,
                blocked_by: version_decision.blocked_by,
            });
        };

        self.release(&ctx, version, variable_decision, pin).await
    }

    /// Write the decision: release (idempotent) and its job, in one unit.
    async fn release(
        &self,
        ctx: &ReleaseTargetContext,
        version: DeploymentVersion,
        variables: VariableDecision,
        pin: Option<ReleaseRecord>,
    ) -> Result<EvaluationOutcome> {
        let mut txn = self.releases.begin(&ctx.target.id).await?;

        let (release, release_created) = match pin {
            Some(pinned) => (pinned, false),
            None => {
                let (version_release, _) = upsert_version_release(txn.as_mut(), version.id).await?;
                let (variable_release, _) =
                    upsert_variable_release(txn.as_mut(), variables.values).await?;
                upsert_release(txn.as_mut(), version_release.id, variable_release.id).await?
            }
        };

        let (job, job_created) = match txn.job_for_release(&release.id).await? {
            Some(existing) => (existing, false),
            None => {
                let job = self.new_job(ctx, &release).await?;
                txn.insert_job(job.clone());
                (job, true)
            }
        };
        txn.commit().await?;

        if release_created {
            METRICS.inc_releases_created();
            obs::emit_release_created(&ctx.target.id, &release.id, &version.tag);
        }
        let job = if job_created {
            METRICS.inc_jobs_created();
            obs::emit_job_created(&job.id, &release.id, job.status);
            if job.status == JobStatus::Pending {
                self.dispatch(job).await?
            } else {
                job
            }
        } else {
            job
        };

        Ok(EvaluationOutcome::Released {
            release,
            version,
            job,
            release_created,
            job_created,
        })
    }

    /// A job for `release`. Deployments without a usable job agent get a
    /// terminal `invalid_job_agent` job that is never dispatched.
    async fn new_job(&self, ctx: &ReleaseTargetContext, release: &ReleaseRecord) -> Result<JobRecord> {
        let deployment = &ctx.deployment;
        let agent = match deployment.job_agent_id {
            Some(agent_id) => self.catalog.get_job_agent(&agent_id).await?,
            None => None,
        };
        let mut job = JobRecord::new(
            release.id,
            ctx.target.id,
            agent.as_ref().map(|a| a.id),
            deployment.job_agent_config.clone(),
        );
        if agent.is_none() {
            let message = match deployment.job_agent_id {
                Some(agent_id) => format!("job agent {agent_id} not found"),
                None => format!("deployment '{}' has no job agent", deployment.name),
            };
            job.status = JobStatus::InvalidJobAgent;
            job.message = Some(message);
            job.completed_at = Some(job.created_at);
        }
        Ok(job)
    }

    async fn dispatch(&self, job: JobRecord) -> Result<JobRecord> {
        match self.executor.dispatch(&job).await {
            Ok(()) => Ok(job),
            Err(err) => {
                warn!(job_id = %job.id, error = %err, "job dispatch failed");
                let update =
                    JobUpdate::status(JobStatus::InvalidIntegration).with_message(err.to_string());
                let updated = self.releases.update_job(&job.id, update).await?;
                obs::emit_job_status_updated(&job.id, job.status, updated.status);
                Ok(updated)
            }
        }
    }

    /// Evaluate many targets concurrently, bounded by
    /// `max_concurrent_evaluations`. Results come back in completion order.
    pub async fn evaluate_all(
        &self,
        ids: Vec<ReleaseTargetId>,
        snapshot: &PolicySnapshot,
    ) -> Vec<(ReleaseTargetId, Result<EvaluationOutcome>)> {
        let results = stream::iter(ids)
            .map(|id| async move { (id, self.evaluate(id, snapshot).await) })
            .buffer_unordered(self.config.max_concurrent_evaluations.max(1))
            .collect::<Vec<_>>()
            .await;
        METRICS.flush();
        results
    }

    /// Evaluate every known release target with a fresh policy snapshot.
    pub async fn evaluate_every_target(&self) -> Result<Vec<(ReleaseTargetId, Result<EvaluationOutcome>)>> {
        let snapshot = self.policy_snapshot().await?;
        let ids = self.targets.list_targets().await?.into_iter().map(|t| t.id).collect();
        Ok(self.evaluate_all(ids, &snapshot).await)
    }

    /// Drain the re-evaluation queue until `shutdown` resolves.
    ///
    /// Each batch waits `requeue_delay`, then is evaluated against a freshly
    /// fetched policy snapshot.
    pub async fn run_until<F>(&self, mut receiver: EvaluationReceiver, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let first = tokio::select! {
                _ = &mut shutdown => break,
                next = receiver.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.config.requeue_delay) => {}
            }

            let mut batch = vec![first];
            batch.extend(receiver.drain());

            let snapshot = match self.policy_snapshot().await {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(error = %err, pending = batch.len(), "policy fetch failed, requeueing batch");
                    for id in batch {
                        self.queue.enqueue(id);
                    }
                    continue;
                }
            };
            for (id, result) in self.evaluate_all(batch, &snapshot).await {
                if let Err(err) = result {
                    debug!(release_target_id = %id, error = %err, "re-evaluation failed");
                }
            }
        }
        debug!("re-evaluation worker stopped");
    }

    // -----------------------------------------------------------------------
    // Operator and executor callbacks
    // -----------------------------------------------------------------------

    /// Inbound job status callback. When a job stops being active, the rest
    /// of its cohort is re-queued since a concurrency slot opened up.
    pub async fn on_status_update(&self, job_id: &JobId, update: JobUpdate) -> Result<JobRecord> {
        let before = self.releases.get_job(job_id).await?;
        let after = self.releases.update_job(job_id, update).await?;
        if before.status != after.status {
            obs::emit_job_status_updated(job_id, before.status, after.status);
        }

        if before.status.is_active() && after.status.is_terminal() {
            if let Some(target) = self.targets.get_target(&after.release_target_id).await? {
                let cohort = self
                    .targets
                    .targets_for_cohort(&target.deployment_id, &target.environment_id)
                    .await?;
                for member in cohort {
                    if self.queue.enqueue(member.id) {
                        METRICS.inc_requeues();
                    }
                }
            }
        }
        Ok(after)
    }

    /// Pin a release on a target, or clear the pin with `None`. The target
    /// is queued for re-evaluation.
    pub async fn set_desired_release(
        &self,
        id: &ReleaseTargetId,
        release_id: Option<ReleaseId>,
    ) -> Result<ReleaseTargetRecord> {
        let record = self.targets.set_desired_release(id, release_id).await?;
        self.queue.enqueue(*id);
        Ok(record)
    }

    /// Where a target sits in a version's rollout, or `None` when no rollout
    /// policy applies to it.
    pub async fn get_rollout_status(
        &self,
        id: &ReleaseTargetId,
        version_id: &DeploymentVersionId,
        snapshot: &PolicySnapshot,
    ) -> Result<Option<RolloutStatus>> {
        let target = self.get_target(id).await?;
        let ctx = self.context(target).await?;
        let version = self
            .catalog
            .get_version(version_id)
            .await?
            .ok_or_else(|| ReleaseError::not_found("deployment version", version_id))?;
        let policy = snapshot.resolve(&ctx);
        VersionManager::new(
            self.catalog.as_ref(),
            self.targets.as_ref(),
            self.releases.as_ref(),
            self.config.candidate_limit,
        )
        .rollout_status(&ctx, policy.as_ref(), &version)
        .await
    }
}
