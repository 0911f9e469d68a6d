//! Job executor seam.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use release_state::JobRecord;

use crate::error::{ReleaseError, Result};

/// Hands jobs to an external execution system. Fire-and-forget: status
/// comes back later through the coordinator's status callback.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn dispatch(&self, job: &JobRecord) -> Result<()>;
}

/// Executor that records dispatched jobs in memory.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    dispatched: Mutex<Vec<JobRecord>>,
    fail_with: Option<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// An executor whose every dispatch fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
            fail_with: Some(message.into()),
        }
    }

    pub fn dispatched(&self) -> Vec<JobRecord> {
        self.dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl JobExecutor for RecordingExecutor {
    async fn dispatch(&self, job: &JobRecord) -> Result<()> {
        if let Some(message) = &self.fail_with {
            tracing::warn!(job_id = %job.id, %message, "dispatch rejected");
            return Err(ReleaseError::Dispatch(message.clone()));
        }
        self.dispatched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job.clone());
        Ok(())
    }
}
