//! Error taxonomy for the release engine.

use release_state::StorageError;

/// A selector condition tree that cannot be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error("{kind} condition must have at least one child")]
    EmptyCompound { kind: &'static str },

    #[error("invalid regex '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("condition nesting exceeds maximum depth of {max}")]
    TooDeep { max: usize },

    #[error("metadata key must not be empty")]
    EmptyKey,

    #[error("numeric comparison value must be finite")]
    NonFiniteNumber,
}

/// A policy rejected at write time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyConfigError {
    #[error("policy must have at least one target")]
    NoTargets,

    #[error("rollout growth factor must be > 0, got {0}")]
    InvalidGrowthFactor(f64),

    #[error("rollout time scale interval must be > 0 minutes, got {0}")]
    InvalidTimeScale(i64),

    #[error("rollout time scale interval must be at most {max} minutes, got {minutes}")]
    TimeScaleTooLarge { minutes: i64, max: i64 },

    #[error("unknown time zone: {0}")]
    UnknownTimeZone(String),

    #[error("deny window '{name}' ends before it starts")]
    DenyWindowEndsBeforeStart { name: String },

    #[error("deny window '{name}' has no recurrence and no end")]
    DenyWindowUnbounded { name: String },

    #[error("recurrence interval must be >= 1")]
    InvalidInterval,

    #[error("approval requirement needs a count of at least 1")]
    ZeroApprovalCount,

    #[error("user approval requirement has an empty user id")]
    EmptyApprover,

    #[error("concurrency cap must be >= 1")]
    ZeroConcurrency,

    #[error("invalid {facet} condition: {source}")]
    Condition {
        facet: &'static str,
        #[source]
        source: ConditionError,
    },
}

/// Release engine errors.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid policy: {0}")]
    Policy(#[from] PolicyConfigError),

    #[error("invalid condition: {0}")]
    Condition(#[from] ConditionError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("job dispatch failed: {0}")]
    Dispatch(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReleaseError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        ReleaseError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Contention that should be converted into a re-queue.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReleaseError::Storage(e) if e.is_transient())
    }
}

/// Result type for release engine operations.
pub type Result<T> = std::result::Result<T, ReleaseError>;
