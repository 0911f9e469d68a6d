//! Release-target membership: selector changes, target creation/deletion and
//! exit hooks.

mod common;

use std::collections::BTreeMap;

use common::{prod_selector, Fixture};
use release_core::selector::StringOperator;
use release_core::*;
use release_state::{EnvironmentId, ReleaseTargetStore};

#[tokio::test]
async fn newly_matched_resources_get_one_target_per_deployment() {
    let fx = Fixture::new();
    let second = Deployment {
        id: Default::default(),
        system_id: fx.system.id,
        name: "worker".into(),
        slug: "worker".into(),
        metadata: BTreeMap::new(),
        resource_selector: Some(Condition::metadata_equals("role", "batch")),
        job_agent_id: None,
        job_agent_config: serde_json::Value::Null,
    };
    fx.catalog.upsert_deployment(second.clone()).unwrap();

    let web = fx.add_resource("web-1");
    let batch = Resource::new("batch-1", "Host")
        .with_metadata("env", "prod")
        .with_metadata("role", "batch");
    fx.catalog.upsert_resource(batch.clone());
    let outside = Resource::new("dev-1", "Host").with_metadata("env", "dev");
    fx.catalog.upsert_resource(outside.clone());

    let change = fx.reconcile().await;
    assert_eq!(change.diff.added.len(), 2);
    assert!(!change.diff.added.contains(&outside.id));
    // web-1 -> api; batch-1 -> api + worker
    assert_eq!(change.created.len(), 3);

    let batch_targets = fx.store.targets_for_resource(&batch.id).await.unwrap();
    assert_eq!(batch_targets.len(), 2);
    assert!(batch_targets.iter().any(|t| t.deployment_id == second.id));
    let web_targets = fx.store.targets_for_resource(&web.id).await.unwrap();
    assert_eq!(web_targets.len(), 1);

    // Reconciling again creates nothing new.
    let again = fx.reconcile().await;
    assert!(again.created.is_empty());
}

#[tokio::test]
async fn removal_deletes_targets_and_fires_exit_on_system_exit() {
    let fx = Fixture::new();
    // A second environment keeps "shared" in the system.
    let canary = Environment {
        id: EnvironmentId::new(),
        system_id: fx.system.id,
        name: "canary".into(),
        metadata: BTreeMap::new(),
        resource_selector: Some(Condition::metadata_equals("canary", "yes")),
    };
    fx.catalog.upsert_environment(canary).unwrap();

    let shared = Resource::new("shared", "Host")
        .with_metadata("env", "prod")
        .with_metadata("canary", "yes");
    fx.catalog.upsert_resource(shared.clone());
    let solo = fx.add_resource("solo");
    fx.reconcile().await;

    // Narrow prod to nothing.
    let narrowed = Condition::Name {
        operator: StringOperator::Equals,
        value: "nobody".into(),
    };
    let change = fx
        .engine
        .on_selector_changed(fx.environment.id, Some(&prod_selector()), Some(&narrowed))
        .await
        .unwrap();

    assert_eq!(change.diff.removed.len(), 2);
    assert_eq!(change.deleted.len(), 2);
    assert!(fx.store.targets_for_resource(&shared.id).await.unwrap().is_empty());
    assert!(fx.store.targets_for_resource(&solo.id).await.unwrap().is_empty());

    assert_eq!(change.exited, vec![(solo.id, fx.deployment.id)]);
    assert_eq!(fx.exits.exits(), vec![(solo.id, fx.deployment.id)]);
}

#[tokio::test]
async fn removed_target_cascades_releases() {
    let fx = Fixture::new();
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;
    fx.add_version("v1", 5);
    fx.evaluate(target).await;
    assert_eq!(fx.store.release_count().unwrap(), 1);

    fx.engine
        .on_selector_changed(fx.environment.id, Some(&prod_selector()), None)
        .await
        .unwrap();
    assert_eq!(fx.store.release_count().unwrap(), 0);
    assert_eq!(fx.store.job_count().unwrap(), 0);
}

#[tokio::test]
async fn deleted_resource_exits_every_deployment() {
    let fx = Fixture::new();
    let resource = fx.add_resource("node-1");
    fx.target_for(&resource).await;

    fx.catalog.remove_resource(&resource.id);
    let exited = fx.engine.on_resource_deleted(resource.id).await.unwrap();
    assert_eq!(exited, vec![(resource.id, fx.deployment.id)]);
    assert_eq!(fx.exits.exits().len(), 1);
    assert!(fx.store.list_targets().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_environment_is_not_found() {
    let fx = Fixture::new();
    let err = fx
        .engine
        .on_selector_changed(EnvironmentId::new(), None, Some(&prod_selector()))
        .await
        .unwrap_err();
    assert!(matches!(err, ReleaseError::NotFound { kind: "environment", .. }));
}
