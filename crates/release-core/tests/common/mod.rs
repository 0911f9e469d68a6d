//! Shared fixture for engine integration tests: one system with a `prod`
//! environment and an `api` deployment, in-memory catalog and store.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use release_core::dispatch::EvaluationReceiver;
use release_core::*;
use release_state::{EnvironmentId, JobAgentId, ReleaseStore, ReleaseTargetId, SystemId};

pub struct Fixture {
    pub catalog: Arc<MemoryCatalog>,
    pub store: Arc<MemoryReleaseStore>,
    pub executor: Arc<RecordingExecutor>,
    pub exits: Arc<RecordingExitHook>,
    pub engine: ReleaseEngine,
    pub receiver: Option<EvaluationReceiver>,
    pub system: System,
    pub environment: Environment,
    pub deployment: Deployment,
}

pub fn prod_selector() -> Condition {
    Condition::metadata_equals("env", "prod")
}

impl Fixture {
    pub fn new() -> Self {
        Self::build(RecordingExecutor::new(), true)
    }

    pub fn build(executor: RecordingExecutor, with_agent: bool) -> Self {
        Self::assemble(executor, with_agent, |store| store as Arc<dyn ReleaseStore>)
    }

    /// Like [`Fixture::new`], but the engine writes releases through the
    /// store returned by `wrap`. Targets still live in the plain memory
    /// store.
    pub fn with_release_store(
        wrap: impl FnOnce(Arc<MemoryReleaseStore>) -> Arc<dyn ReleaseStore>,
    ) -> Self {
        Self::assemble(RecordingExecutor::new(), true, wrap)
    }

    fn assemble(
        executor: RecordingExecutor,
        with_agent: bool,
        wrap: impl FnOnce(Arc<MemoryReleaseStore>) -> Arc<dyn ReleaseStore>,
    ) -> Self {
        let catalog = Arc::new(MemoryCatalog::new());
        let store = Arc::new(MemoryReleaseStore::new());
        let executor = Arc::new(executor);
        let exits = Arc::new(RecordingExitHook::new());

        let system = System {
            id: SystemId::new(),
            name: "payments".into(),
        };
        catalog.upsert_system(system.clone());

        let environment = Environment {
            id: EnvironmentId::new(),
            system_id: system.id,
            name: "prod".into(),
            metadata: BTreeMap::new(),
            resource_selector: Some(prod_selector()),
        };
        catalog.upsert_environment(environment.clone()).unwrap();

        let agent = JobAgent {
            id: JobAgentId::new(),
            name: "runner".into(),
            kind: "kubernetes".into(),
        };
        catalog.upsert_job_agent(agent.clone());

        let deployment = Deployment {
            id: Default::default(),
            system_id: system.id,
            name: "api".into(),
            slug: "api".into(),
            metadata: BTreeMap::new(),
            resource_selector: None,
            job_agent_id: with_agent.then_some(agent.id),
            job_agent_config: serde_json::json!({"namespace": "payments"}),
        };
        catalog.upsert_deployment(deployment.clone()).unwrap();

        let config = EngineConfig::default().with_requeue_delay(StdDuration::from_millis(10));
        let (engine, receiver) = ReleaseEngine::new(
            catalog.clone(),
            store.clone(),
            wrap(store.clone()),
            executor.clone(),
            config,
        );
        let engine = engine.with_exit_hook(exits.clone());

        Self {
            catalog,
            store,
            executor,
            exits,
            engine,
            receiver: Some(receiver),
            system,
            environment,
            deployment,
        }
    }

    /// Add a resource in `prod`.
    pub fn add_resource(&self, name: &str) -> Resource {
        let resource = Resource::new(name, "Host").with_metadata("env", "prod");
        self.catalog.upsert_resource(resource.clone());
        resource
    }

    /// Create release targets for every resource matching `prod`.
    pub async fn reconcile(&self) -> MembershipChange {
        self.engine
            .on_selector_changed(
                self.environment.id,
                None,
                self.environment.resource_selector.as_ref(),
            )
            .await
            .unwrap()
    }

    /// Reconcile and return the single target of `resource`.
    pub async fn target_for(&self, resource: &Resource) -> ReleaseTargetId {
        self.reconcile().await;
        let targets = release_state::ReleaseTargetStore::targets_for_resource(
            self.store.as_ref(),
            &resource.id,
        )
        .await
        .unwrap();
        assert_eq!(targets.len(), 1);
        targets[0].id
    }

    /// A ready version created `minutes_ago` minutes in the past.
    pub fn add_version(&self, tag: &str, minutes_ago: i64) -> DeploymentVersion {
        let version = DeploymentVersion::new(
            self.deployment.id,
            tag,
            Utc::now() - Duration::minutes(minutes_ago),
        );
        self.catalog.upsert_version(version.clone());
        version
    }

    pub fn add_policy(&self, policy: Policy) -> Policy {
        self.catalog.upsert_policy(policy.clone()).unwrap();
        policy
    }

    pub async fn evaluate(&self, id: ReleaseTargetId) -> EvaluationOutcome {
        let snapshot = self.engine.policy_snapshot().await.unwrap();
        self.engine.evaluate(id, &snapshot).await.unwrap()
    }
}

/// Unpack a `Released` outcome.
pub fn released(outcome: EvaluationOutcome) -> (ReleaseRecord, DeploymentVersion, JobRecord, bool) {
    match outcome {
        EvaluationOutcome::Released {
            release,
            version,
            job,
            release_created,
            ..
        } => (release, version, job, release_created),
        other => panic!("expected a release, got {other:?}"),
    }
}
