//! Trait contract tests for ReleaseTargetStore and ReleaseStore.
//!
//! Each contract is written once against the traits and run against both
//! the in-memory backend and SurrealDB (`mem://`).

use std::sync::Arc;

use release_state::*;

async fn surreal() -> SurrealReleaseStore {
    let handle = Arc::new(SurrealHandle::setup_db().await.unwrap());
    SurrealReleaseStore::new(handle)
}

fn snapshot(key: &str, value: serde_json::Value) -> VariableSnapshot {
    VariableSnapshot {
        key: key.to_string(),
        value,
        sensitive: false,
    }
}

/// Stage and commit one full release (version release, variable release,
/// release, job) for `target`.
async fn write_release<S: ReleaseStore>(
    store: &S,
    target: ReleaseTargetId,
    version: DeploymentVersionId,
) -> (ReleaseRecord, JobRecord) {
    let mut txn = store.begin(&target).await.unwrap();
    let vr = VersionReleaseRecord::new(target, version);
    let varr = VariableSetReleaseRecord::new(target, vec![snapshot("replicas", 3.into())]);
    let release = ReleaseRecord::new(target, vr.id, varr.id);
    let job = JobRecord::new(release.id, target, None, serde_json::json!({"queue": "default"}));
    txn.insert_version_release(vr);
    txn.insert_variable_release(varr);
    txn.insert_release(release.clone());
    txn.insert_job(job.clone());
    txn.commit().await.unwrap();
    (release, job)
}

// ===========================================================================
// Contracts
// ===========================================================================

async fn upsert_is_idempotent<S: ReleaseTargetStore>(store: &S) {
    let (r, e, d) = (ResourceId::new(), EnvironmentId::new(), DeploymentId::new());
    let (first, created) = store.upsert_target(r, e, d).await.unwrap();
    assert!(created);
    let (second, created) = store.upsert_target(r, e, d).await.unwrap();
    assert!(!created);
    assert_eq!(first.id, second.id);
    assert_eq!(store.list_targets().await.unwrap().len(), 1);
}

async fn target_queries_filter_by_key<S: ReleaseTargetStore>(store: &S) {
    let resource = ResourceId::new();
    let env = EnvironmentId::new();
    let dep = DeploymentId::new();
    store.upsert_target(resource, env, dep).await.unwrap();
    store
        .upsert_target(ResourceId::new(), env, dep)
        .await
        .unwrap();
    store
        .upsert_target(resource, EnvironmentId::new(), dep)
        .await
        .unwrap();

    assert_eq!(store.targets_for_environment(&env).await.unwrap().len(), 2);
    assert_eq!(store.targets_for_cohort(&dep, &env).await.unwrap().len(), 2);
    assert_eq!(store.targets_for_resource(&resource).await.unwrap().len(), 2);
}

async fn committed_release_is_visible<S: ReleaseTargetStore + ReleaseStore>(store: &S) {
    let (target, _) = store
        .upsert_target(ResourceId::new(), EnvironmentId::new(), DeploymentId::new())
        .await
        .unwrap();
    let version = DeploymentVersionId::new();
    let (release, job) = write_release(store, target.id, version).await;

    let latest = store.latest_release(&target.id).await.unwrap().unwrap();
    assert_eq!(latest.id, release.id);
    let fetched = store.get_job(&job.id).await.unwrap();
    assert_eq!(fetched.status, JobStatus::Pending);
    assert_eq!(fetched.job_agent_config["queue"], "default");

    let varr = store
        .get_variable_release(&release.variable_release_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(varr.values[0].key, "replicas");

    // Pending is not deployed.
    assert_eq!(store.latest_deployed_version(&target.id).await.unwrap(), None);
    store
        .update_job(&job.id, JobUpdate::status(JobStatus::Successful))
        .await
        .unwrap();
    assert_eq!(
        store.latest_deployed_version(&target.id).await.unwrap(),
        Some(version)
    );
}

async fn dropped_txn_writes_nothing<S: ReleaseTargetStore + ReleaseStore>(store: &S) {
    let (target, _) = store
        .upsert_target(ResourceId::new(), EnvironmentId::new(), DeploymentId::new())
        .await
        .unwrap();
    {
        let mut txn = store.begin(&target.id).await.unwrap();
        txn.insert_version_release(VersionReleaseRecord::new(
            target.id,
            DeploymentVersionId::new(),
        ));
    }
    let mut txn = store.begin(&target.id).await.unwrap();
    assert!(txn.latest_version_release().await.unwrap().is_none());
}

async fn txn_reads_its_own_writes<S: ReleaseTargetStore + ReleaseStore>(store: &S) {
    let (target, _) = store
        .upsert_target(ResourceId::new(), EnvironmentId::new(), DeploymentId::new())
        .await
        .unwrap();
    let mut txn = store.begin(&target.id).await.unwrap();
    let vr = VersionReleaseRecord::new(target.id, DeploymentVersionId::new());
    txn.insert_version_release(vr.clone());
    assert_eq!(txn.latest_version_release().await.unwrap(), Some(vr));
}

async fn begin_on_missing_target_is_not_visible<S: ReleaseStore>(store: &S) {
    let err = store.begin(&ReleaseTargetId::new()).await.err().unwrap();
    assert!(matches!(err, StorageError::TargetNotVisible { .. }));
    assert!(err.is_transient());
}

async fn commit_after_delete_is_not_visible<S: ReleaseTargetStore + ReleaseStore>(store: &S) {
    let (target, _) = store
        .upsert_target(ResourceId::new(), EnvironmentId::new(), DeploymentId::new())
        .await
        .unwrap();
    let mut txn = store.begin(&target.id).await.unwrap();
    txn.insert_version_release(VersionReleaseRecord::new(
        target.id,
        DeploymentVersionId::new(),
    ));
    assert!(store.delete_target(&target.id).await.unwrap());

    let err = txn.commit().await.unwrap_err();
    assert!(matches!(err, StorageError::TargetNotVisible { .. }));
}

async fn duplicate_release_pair_conflicts<S: ReleaseTargetStore + ReleaseStore>(store: &S) {
    let (target, _) = store
        .upsert_target(ResourceId::new(), EnvironmentId::new(), DeploymentId::new())
        .await
        .unwrap();
    let vr = VersionReleaseRecord::new(target.id, DeploymentVersionId::new());
    let varr = VariableSetReleaseRecord::new(target.id, vec![]);

    let mut first = store.begin(&target.id).await.unwrap();
    first.insert_version_release(vr.clone());
    first.insert_variable_release(varr.clone());
    first.insert_release(ReleaseRecord::new(target.id, vr.id, varr.id));
    first.commit().await.unwrap();

    let mut second = store.begin(&target.id).await.unwrap();
    second.insert_release(ReleaseRecord::new(target.id, vr.id, varr.id));
    let err = second.commit().await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict { .. }), "got {err:?}");
}

async fn delete_cascades<S: ReleaseTargetStore + ReleaseStore>(store: &S) {
    let (target, _) = store
        .upsert_target(ResourceId::new(), EnvironmentId::new(), DeploymentId::new())
        .await
        .unwrap();
    let (release, job) = write_release(store, target.id, DeploymentVersionId::new()).await;

    assert!(store.delete_target(&target.id).await.unwrap());
    assert!(!store.delete_target(&target.id).await.unwrap());
    assert!(store.get_target(&target.id).await.unwrap().is_none());
    assert!(store.get_release(&release.id).await.unwrap().is_none());
    assert!(matches!(
        store.get_job(&job.id).await.unwrap_err(),
        StorageError::JobNotFound { .. }
    ));
}

async fn active_jobs_span_targets<S: ReleaseTargetStore + ReleaseStore>(store: &S) {
    let env = EnvironmentId::new();
    let dep = DeploymentId::new();
    let (a, _) = store.upsert_target(ResourceId::new(), env, dep).await.unwrap();
    let (b, _) = store.upsert_target(ResourceId::new(), env, dep).await.unwrap();
    let (_, job_a) = write_release(store, a.id, DeploymentVersionId::new()).await;
    let (_, job_b) = write_release(store, b.id, DeploymentVersionId::new()).await;

    store
        .update_job(&job_b.id, JobUpdate::status(JobStatus::Failure))
        .await
        .unwrap();

    let active = store.active_jobs(&[a.id, b.id]).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, job_a.id);
}

async fn terminal_job_rejects_new_status<S: ReleaseTargetStore + ReleaseStore>(store: &S) {
    let (target, _) = store
        .upsert_target(ResourceId::new(), EnvironmentId::new(), DeploymentId::new())
        .await
        .unwrap();
    let (_, job) = write_release(store, target.id, DeploymentVersionId::new()).await;

    let updated = store
        .update_job(
            &job.id,
            JobUpdate::status(JobStatus::InProgress).with_external_id("gh-run-7"),
        )
        .await
        .unwrap();
    assert!(updated.started_at.is_some());
    assert_eq!(updated.external_id.as_deref(), Some("gh-run-7"));

    store
        .update_job(&job.id, JobUpdate::status(JobStatus::Cancelled))
        .await
        .unwrap();
    let err = store
        .update_job(&job.id, JobUpdate::status(JobStatus::Successful))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidJobTransition { .. }));
}

async fn desired_release_must_belong_to_target<S: ReleaseTargetStore + ReleaseStore>(store: &S) {
    let (target, _) = store
        .upsert_target(ResourceId::new(), EnvironmentId::new(), DeploymentId::new())
        .await
        .unwrap();
    let (other, _) = store
        .upsert_target(ResourceId::new(), EnvironmentId::new(), DeploymentId::new())
        .await
        .unwrap();
    let (release, _) = write_release(store, target.id, DeploymentVersionId::new()).await;

    let pinned = store
        .set_desired_release(&target.id, Some(release.id))
        .await
        .unwrap();
    assert_eq!(pinned.desired_release_id, Some(release.id));

    let err = store
        .set_desired_release(&other.id, Some(release.id))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::ReleaseNotFound { .. }));

    let cleared = store.set_desired_release(&target.id, None).await.unwrap();
    assert_eq!(cleared.desired_release_id, None);
}

// ===========================================================================
// Backends
// ===========================================================================

macro_rules! contract_tests {
    ($module:ident, $store:expr) => {
        mod $module {
            use super::*;

            #[tokio::test]
            async fn upsert_is_idempotent() {
                super::upsert_is_idempotent(&$store).await;
            }

            #[tokio::test]
            async fn target_queries_filter_by_key() {
                super::target_queries_filter_by_key(&$store).await;
            }

            #[tokio::test]
            async fn committed_release_is_visible() {
                super::committed_release_is_visible(&$store).await;
            }

            #[tokio::test]
            async fn dropped_txn_writes_nothing() {
                super::dropped_txn_writes_nothing(&$store).await;
            }

            #[tokio::test]
            async fn txn_reads_its_own_writes() {
                super::txn_reads_its_own_writes(&$store).await;
            }

            #[tokio::test]
            async fn begin_on_missing_target_is_not_visible() {
                super::begin_on_missing_target_is_not_visible(&$store).await;
            }

            #[tokio::test]
            async fn commit_after_delete_is_not_visible() {
                super::commit_after_delete_is_not_visible(&$store).await;
            }

            #[tokio::test]
            async fn duplicate_release_pair_conflicts() {
                super::duplicate_release_pair_conflicts(&$store).await;
            }

            #[tokio::test]
            async fn delete_cascades() {
                super::delete_cascades(&$store).await;
            }

            #[tokio::test]
            async fn active_jobs_span_targets() {
                super::active_jobs_span_targets(&$store).await;
            }

            #[tokio::test]
            async fn terminal_job_rejects_new_status() {
                super::terminal_job_rejects_new_status(&$store).await;
            }

            #[tokio::test]
            async fn desired_release_must_belong_to_target() {
                super::desired_release_must_belong_to_target(&$store).await;
            }
        }
    };
}

contract_tests!(memory, MemoryReleaseStore::new());
contract_tests!(surrealdb, surreal().await);
