//! Structured observability hooks for release lifecycle events.
//!
//! This module provides:
//! - Target-scoped tracing spans via the `EvaluationSpan` RAII guard
//! - Emission functions for evaluation, release, job and membership events
//!
//! Events are emitted at `info!` level with an `event` field naming them,
//! so they can be filtered through `RUST_LOG` and read as JSON lines.

use std::future::Future;

use release_state::{
    DeploymentId, EnvironmentId, JobId, JobStatus, ReleaseId, ReleaseTargetId, ResourceId,
};
use tracing::info;
use tracing::instrument::{Instrument, Instrumented};

/// Span tagged with the release target id.
///
/// Async code wraps its futures with [`EvaluationSpan::instrument`];
/// synchronous code can hold the RAII guard from [`EvaluationSpan::enter`].
///
/// ```ignore
/// let span = EvaluationSpan::new(&target_id);
/// span.instrument(evaluate(target_id)).await;
/// ```
pub struct EvaluationSpan {
    span: tracing::Span,
}

impl EvaluationSpan {
    pub fn new(release_target_id: &ReleaseTargetId) -> Self {
        Self {
            span: tracing::info_span!("ctrlplane.evaluation", release_target_id = %release_target_id),
        }
    }

    /// Enter the span until the guard drops. Not for use across `.await`.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    pub fn instrument<F: Future>(&self, future: F) -> Instrumented<F> {
        future.instrument(self.span.clone())
    }
}

pub fn emit_evaluation_started(release_target_id: &ReleaseTargetId) {
    info!(event = "evaluation.started", release_target_id = %release_target_id);
}

/// `outcome` is one of `released`, `no_candidate`, `pending`.
pub fn emit_evaluation_finished(release_target_id: &ReleaseTargetId, outcome: &str, duration_ms: u64) {
    info!(
        event = "evaluation.finished",
        release_target_id = %release_target_id,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}

pub fn emit_evaluation_requeued(release_target_id: &ReleaseTargetId, reason: &str) {
    info!(event = "evaluation.requeued", release_target_id = %release_target_id, reason = %reason);
}

/// Evaluation aborted by an error; the target keeps its previous state.
pub fn emit_evaluation_failed(release_target_id: &ReleaseTargetId, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "evaluation.failed", release_target_id = %release_target_id, error = %error);
}

pub fn emit_release_created(release_target_id: &ReleaseTargetId, release_id: &ReleaseId, version_tag: &str) {
    info!(
        event = "release.created",
        release_target_id = %release_target_id,
        release_id = %release_id,
        version = %version_tag,
    );
}

pub fn emit_job_created(job_id: &JobId, release_id: &ReleaseId, status: JobStatus) {
    info!(event = "job.created", job_id = %job_id, release_id = %release_id, status = %status);
}

pub fn emit_job_status_updated(job_id: &JobId, from: JobStatus, to: JobStatus) {
    info!(event = "job.status_updated", job_id = %job_id, from = %from, to = %to);
}

pub fn emit_membership_changed(environment_id: &EnvironmentId, added: usize, removed: usize, unchanged: usize) {
    info!(
        event = "membership.changed",
        environment_id = %environment_id,
        added = added,
        removed = removed,
        unchanged = unchanged,
    );
}

pub fn emit_resource_exited(resource_id: &ResourceId, deployment_id: &DeploymentId) {
    info!(event = "resource.exited", resource_id = %resource_id, deployment_id = %deployment_id);
}
