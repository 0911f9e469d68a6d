//! Workspace bootstrap: load a catalog fixture, pick a release store and
//! reconcile release targets for every environment.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use release_core::{
    CatalogSnapshot, EngineConfig, EvaluationReceiver, ExitHook, JobExecutor, MemoryCatalog,
    ReleaseEngine,
};
use release_state::{
    DeploymentId, JobRecord, MemoryReleaseStore, ReleaseStore, ReleaseTargetStore, ResourceId,
    SurrealConfig, SurrealHandle, SurrealReleaseStore,
};
use tracing::info;

/// Executor that only logs: the CLI has no job runner attached.
struct LogExecutor;

#[async_trait]
impl JobExecutor for LogExecutor {
    async fn dispatch(&self, job: &JobRecord) -> release_core::Result<()> {
        info!(
            event = "job.dispatched",
            job_id = %job.id,
            release_id = %job.release_id,
            job_agent_id = ?job.job_agent_id,
            "job handed to executor"
        );
        Ok(())
    }
}

struct LogExitHook;

#[async_trait]
impl ExitHook for LogExitHook {
    async fn on_exit(
        &self,
        resource_id: ResourceId,
        deployment_id: DeploymentId,
    ) -> release_core::Result<()> {
        info!(%resource_id, %deployment_id, "resource left system");
        Ok(())
    }
}

pub struct Workspace {
    pub catalog: Arc<MemoryCatalog>,
    pub targets: Arc<dyn ReleaseTargetStore>,
    pub releases: Arc<dyn ReleaseStore>,
    pub engine: ReleaseEngine,
    pub receiver: Option<EvaluationReceiver>,
}

impl Workspace {
    /// Load `fixture` and reconcile targets. Without `store_url` release
    /// state lives in memory for this process only.
    pub async fn load(
        fixture: &Path,
        store_url: Option<&str>,
        config: EngineConfig,
    ) -> Result<Self> {
        let content = std::fs::read_to_string(fixture)
            .with_context(|| format!("Failed to read workspace fixture: {:?}", fixture))?;
        let snapshot: CatalogSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("Workspace fixture is not valid JSON: {:?}", fixture))?;
        let environments = snapshot.environments.clone();
        let catalog = Arc::new(
            MemoryCatalog::from_snapshot(snapshot).context("Workspace fixture rejected")?,
        );

        let (targets, releases): (Arc<dyn ReleaseTargetStore>, Arc<dyn ReleaseStore>) =
            match store_url {
                Some(url) => {
                    let config = SurrealConfig {
                        url: url.to_string(),
                        ..SurrealConfig::from_env()
                    };
                    let handle = SurrealHandle::setup(config)
                        .await
                        .context("Failed to connect to release store")?;
                    let store = Arc::new(SurrealReleaseStore::new(Arc::new(handle)));
                    (store.clone() as Arc<dyn ReleaseTargetStore>, store as Arc<dyn ReleaseStore>)
                }
                None => {
                    let store = Arc::new(MemoryReleaseStore::new());
                    (store.clone() as Arc<dyn ReleaseTargetStore>, store as Arc<dyn ReleaseStore>)
                }
            };

        let (engine, receiver) = ReleaseEngine::new(
            catalog.clone(),
            targets.clone(),
            releases.clone(),
            Arc::new(LogExecutor),
            config,
        );
        let engine = engine.with_exit_hook(Arc::new(LogExitHook));

        for env in &environments {
            let change = engine
                .on_selector_changed(env.id, None, env.resource_selector.as_ref())
                .await
                .with_context(|| format!("Failed to reconcile environment {}", env.name))?;
            info!(
                environment = %env.name,
                created = change.created.len(),
                matched = change.diff.added.len(),
                "environment reconciled"
            );
        }

        Ok(Self {
            catalog,
            targets,
            releases,
            engine,
            receiver: Some(receiver),
        })
    }
}
