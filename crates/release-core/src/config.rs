//! Engine configuration.

use std::str::FromStr;
use std::time::Duration;

use crate::error::{ReleaseError, Result};

/// Tunables of the release engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Delay before a re-queued target is evaluated again.
    pub requeue_delay: Duration,
    /// Upper bound on concurrent evaluations in `evaluate_all`.
    pub max_concurrent_evaluations: usize,
    /// Upper bound on version candidates considered per evaluation.
    pub candidate_limit: usize,
    /// Capacity of the re-evaluation queue.
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            requeue_delay: Duration::from_millis(500),
            max_concurrent_evaluations: 16,
            candidate_limit: 500,
            queue_capacity: 1024,
        }
    }
}

fn env_override<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ReleaseError::Config(format!("{name}: invalid value '{raw}'"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ReleaseError::Config(format!("{name}: {e}"))),
    }
}

fn positive(name: &str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(ReleaseError::Config(format!("{name} must be > 0")));
    }
    Ok(value)
}

impl EngineConfig {
    /// Defaults overridden by `CTRLPLANE_*` environment variables.
    ///
    /// - `CTRLPLANE_REQUEUE_DELAY_MS`
    /// - `CTRLPLANE_MAX_CONCURRENT_EVALUATIONS`
    /// - `CTRLPLANE_CANDIDATE_LIMIT`
    /// - `CTRLPLANE_QUEUE_CAPACITY`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = env_override::<u64>("CTRLPLANE_REQUEUE_DELAY_MS")? {
            config.requeue_delay = Duration::from_millis(ms);
        }
        if let Some(n) = env_override("CTRLPLANE_MAX_CONCURRENT_EVALUATIONS")? {
            config.max_concurrent_evaluations = positive("CTRLPLANE_MAX_CONCURRENT_EVALUATIONS", n)?;
        }
        if let Some(n) = env_override("CTRLPLANE_CANDIDATE_LIMIT")? {
            config.candidate_limit = positive("CTRLPLANE_CANDIDATE_LIMIT", n)?;
        }
        if let Some(n) = env_override("CTRLPLANE_QUEUE_CAPACITY")? {
            config.queue_capacity = positive("CTRLPLANE_QUEUE_CAPACITY", n)?;
        }
        Ok(config)
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub fn with_candidate_limit(mut self, limit: usize) -> Self {
        self.candidate_limit = limit;
        self
    }

    pub fn with_max_concurrent_evaluations(mut self, n: usize) -> Self {
        self.max_concurrent_evaluations = n;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-global; keep every env mutation in one test.
    #[test]
    fn from_env_overrides_and_rejects_garbage() {
        std::env::set_var("CTRLPLANE_REQUEUE_DELAY_MS", "50");
        std::env::set_var("CTRLPLANE_CANDIDATE_LIMIT", "10");
        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.requeue_delay, Duration::from_millis(50));
        assert_eq!(config.candidate_limit, 10);
        assert_eq!(config.queue_capacity, EngineConfig::default().queue_capacity);

        std::env::set_var("CTRLPLANE_CANDIDATE_LIMIT", "0");
        assert!(matches!(EngineConfig::from_env(), Err(ReleaseError::Config(_))));

        std::env::set_var("CTRLPLANE_CANDIDATE_LIMIT", "many");
        let err = EngineConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("CTRLPLANE_CANDIDATE_LIMIT"));

        std::env::remove_var("CTRLPLANE_REQUEUE_DELAY_MS");
        std::env::remove_var("CTRLPLANE_CANDIDATE_LIMIT");
    }
}
