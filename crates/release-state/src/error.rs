//! Error types for release-state

use thiserror::Error;

/// Errors raised while connecting to or preparing the SurrealDB backend.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by the storage trait contracts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("release target not found: {id}")]
    TargetNotFound { id: String },

    /// The release target row exists in a concurrent transaction that has not
    /// committed yet, or was deleted underneath the writer.
    #[error("release target {id} is not visible to this transaction")]
    TargetNotVisible { id: String },

    #[error("release not found: {id}")]
    ReleaseNotFound { id: String },

    #[error("job not found: {id}")]
    JobNotFound { id: String },

    #[error("unique constraint violated: {detail}")]
    Conflict { detail: String },

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidJobTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Contention errors that resolve themselves once the competing writer
    /// commits. Callers re-queue instead of surfacing these.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::TargetNotVisible { .. } | StorageError::Conflict { .. }
        )
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        let message = err.to_string();
        if message.contains("target_not_visible") {
            StorageError::TargetNotVisible { id: message }
        } else if message.contains("already contains") {
            StorageError::Conflict { detail: message }
        } else {
            StorageError::Backend(message)
        }
    }
}
