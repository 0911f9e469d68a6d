//! SurrealDB Handle - Connection and Schema
//!
//! Manages the connection and defines the tables backing the release engine:
//! release targets, version releases, variable-set releases, releases and
//! jobs. Supports in-memory (`mem://`) and remote endpoints.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StateError;
use crate::Result;

/// Connection settings for a SurrealDB backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurrealConfig {
    /// Endpoint URL (`mem://`, `ws://host:8000`, `surrealkv://path`)
    pub url: String,
    /// Namespace (default: "ctrlplane")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
}

impl Default for SurrealConfig {
    fn default() -> Self {
        Self {
            url: "mem://".to_string(),
            namespace: "ctrlplane".to_string(),
            database: "main".to_string(),
        }
    }
}

impl SurrealConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_URL (optional, default: "mem://")
    /// - SURREALDB_NAMESPACE (optional, default: "ctrlplane")
    /// - SURREALDB_DATABASE (optional, default: "main")
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("SURREALDB_URL").unwrap_or(defaults.url),
            namespace: std::env::var("SURREALDB_NAMESPACE").unwrap_or(defaults.namespace),
            database: std::env::var("SURREALDB_DATABASE").unwrap_or(defaults.database),
        }
    }
}

/// SurrealDB connection handle
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
}

impl SurrealHandle {
    /// Connect to SurrealDB in-memory and set up schema
    #[instrument(skip_all)]
    pub async fn setup_db() -> Result<Self> {
        Self::setup(SurrealConfig::default()).await
    }

    /// Connect to the configured endpoint and set up schema
    #[instrument(skip_all, fields(url = %config.url, namespace = %config.namespace, database = %config.database))]
    pub async fn setup(config: SurrealConfig) -> Result<Self> {
        info!("Connecting to SurrealDB");

        let db = surrealdb::engine::any::connect(config.url.as_str())
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to connect to {}: {}", config.url, e))
            })?;

        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to select namespace/database: {}", e))
            })?;

        let handle = SurrealHandle { db };
        handle.init_schema().await?;

        info!("SurrealDB connected and schema initialized");
        Ok(handle)
    }

    /// Connect using environment variables, falling back to in-memory.
    pub async fn setup_from_env() -> Result<Self> {
        Self::setup(SurrealConfig::from_env()).await
    }

    pub(crate) fn db(&self) -> &Surreal<Any> {
        &self.db
    }

    /// Initialize the database schema
    async fn init_schema(&self) -> Result<()> {
        debug!("Initializing release schema");

        let schema = r#"
            -- Release targets (resource x environment x deployment)
            DEFINE TABLE release_targets SCHEMALESS;
            DEFINE INDEX idx_target_id ON release_targets FIELDS target_id UNIQUE;
            DEFINE INDEX idx_target_identity ON release_targets
                FIELDS resource_id, environment_id, deployment_id UNIQUE;
            DEFINE INDEX idx_target_cohort ON release_targets FIELDS deployment_id, environment_id;

            -- Version releases
            DEFINE TABLE version_releases SCHEMALESS;
            DEFINE INDEX idx_vr_id ON version_releases FIELDS version_release_id UNIQUE;
            DEFINE INDEX idx_vr_target ON version_releases FIELDS release_target_id, created_at;

            -- Variable-set releases
            DEFINE TABLE variable_releases SCHEMALESS;
            DEFINE INDEX idx_varr_id ON variable_releases FIELDS variable_release_id UNIQUE;
            DEFINE INDEX idx_varr_target ON variable_releases FIELDS release_target_id, created_at;

            -- Releases (one per version release / variable release pair)
            DEFINE TABLE releases SCHEMALESS;
            DEFINE INDEX idx_release_id ON releases FIELDS release_id UNIQUE;
            DEFINE INDEX idx_release_pair ON releases
                FIELDS version_release_id, variable_release_id UNIQUE;
            DEFINE INDEX idx_release_target ON releases FIELDS release_target_id, created_at;

            -- Jobs (one per release)
            DEFINE TABLE jobs SCHEMALESS;
            DEFINE INDEX idx_job_id ON jobs FIELDS job_id UNIQUE;
            DEFINE INDEX idx_job_release ON jobs FIELDS release_id UNIQUE;
            DEFINE INDEX idx_job_target ON jobs FIELDS release_target_id, created_at;
        "#;

        self.db
            .query(schema)
            .await
            .map_err(|e| StateError::SchemaSetup(e.to_string()))?
            .check()
            .map_err(|e| StateError::SchemaSetup(e.to_string()))?;

        debug!("Schema initialized successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_surreal_connection_and_schema_creation() {
        let handle = SurrealHandle::setup_db().await;
        assert!(handle.is_ok(), "Failed to connect: {:?}", handle.err());
    }

    #[test]
    fn config_builder_overrides_defaults() {
        let config = SurrealConfig::new("ws://localhost:8000")
            .with_namespace("ops")
            .with_database("releases");
        assert_eq!(config.url, "ws://localhost:8000");
        assert_eq!(config.namespace, "ops");
        assert_eq!(config.database, "releases");
    }
}
