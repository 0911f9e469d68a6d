//! End-to-end release evaluation scenarios against in-memory collaborators.

mod common;

use chrono::{Duration, Utc};
use common::{released, Fixture};
use release_core::rollout::floor_to_minute;
use release_core::*;
use release_state::{ReleaseStore, ReleaseTargetId};

fn freeze_around_now() -> DenyWindow {
    let now = Utc::now().naive_utc();
    DenyWindow {
        name: "freeze".into(),
        time_zone: "UTC".into(),
        dtstart: now - Duration::hours(1),
        dtend: Some(now + Duration::hours(1)),
        recurrence: None,
    }
}

/// Deploy `tag` on `target` and mark its job successful.
async fn deploy(fx: &Fixture, target: ReleaseTargetId) -> ReleaseRecord {
    let (release, _, job, _) = released(fx.evaluate(target).await);
    fx.engine
        .on_status_update(&job.id, JobUpdate::status(JobStatus::Successful))
        .await
        .unwrap();
    release
}

#[tokio::test]
async fn newest_version_is_chosen_then_deny_window_blocks_all() {
    let fx = Fixture::new();
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;

    let v1 = fx.add_version("v1", 30);
    deploy(&fx, target).await;
    assert_eq!(
        fx.store.latest_deployed_version(&target).await.unwrap(),
        Some(v1.id)
    );

    let v2 = fx.add_version("v2", 20);
    let v3 = fx.add_version("v3", 10);
    let (_, version, job, created) = released(fx.evaluate(target).await);
    assert_eq!(version.id, v3.id);
    assert!(created);
    assert_eq!(job.status, JobStatus::Pending);

    fx.add_policy(Policy::new("freeze", 10).with_deny_window(freeze_around_now()));
    match fx.evaluate(target).await {
        EvaluationOutcome::NoCandidate {
            rejection_reasons,
            blocked_by,
        } => {
            assert!(blocked_by.unwrap().starts_with("denied by window"));
            assert_eq!(rejection_reasons.len(), 3);
            for id in [v1.id, v2.id, v3.id] {
                assert!(rejection_reasons
                    .get(&id)
                    .unwrap()
                    .starts_with("denied by window 'freeze'"));
            }
        }
        other => panic!("expected no candidate, got {other:?}"),
    }
}

#[tokio::test]
async fn unchanged_decision_is_idempotent() {
    let fx = Fixture::new();
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;
    fx.add_version("v1", 5);

    let (first, _, job, created) = released(fx.evaluate(target).await);
    assert!(created);
    match fx.evaluate(target).await {
        EvaluationOutcome::Released {
            release,
            job: again,
            release_created,
            job_created,
            ..
        } => {
            assert_eq!(release.id, first.id);
            assert_eq!(again.id, job.id);
            assert!(!release_created);
            assert!(!job_created);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(fx.store.release_count().unwrap(), 1);
    assert_eq!(fx.store.job_count().unwrap(), 1);
    assert_eq!(fx.executor.dispatched().len(), 1);
}

#[tokio::test]
async fn older_than_deployed_is_never_selected() {
    let fx = Fixture::new();
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;

    fx.add_version("v1", 30);
    let v2 = fx.add_version("v2", 20);
    deploy(&fx, target).await;

    // v2 is now deployed; a selector that only admits v1 leaves nothing.
    fx.add_policy(
        Policy::new("pin-v1", 1).with_version_selector(Condition::Tag {
            operator: release_core::selector::StringOperator::Equals,
            value: "v1".into(),
        }),
    );
    match fx.evaluate(target).await {
        EvaluationOutcome::NoCandidate {
            rejection_reasons, ..
        } => {
            assert_eq!(rejection_reasons.len(), 1);
            assert!(rejection_reasons.get(&v2.id).is_some());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn building_and_future_versions_are_not_candidates() {
    let fx = Fixture::new();
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;

    let ready = fx.add_version("v1", 10);
    let building = fx
        .add_version("v2", 5)
        .with_status(VersionStatus::Building);
    fx.catalog.upsert_version(building);
    let future = DeploymentVersion::new(fx.deployment.id, "v3", Utc::now() + Duration::hours(1));
    fx.catalog.upsert_version(future);

    let (_, version, _, _) = released(fx.evaluate(target).await);
    assert_eq!(version.id, ready.id);
}

#[tokio::test]
async fn approval_gate_opens_after_second_approval() {
    let fx = Fixture::new();
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;
    let version = fx.add_version("v1", 5);
    let policy = fx.add_policy(
        Policy::new("two-approvers", 1).with_approval(ApprovalRequirement::Any { required: 2 }),
    );

    fx.catalog.record_approval(ApprovalRecord::approved(
        version.id,
        policy.id,
        "alice",
        ApprovalKind::Any,
        Utc::now(),
    ));
    match fx.evaluate(target).await {
        EvaluationOutcome::NoCandidate {
            rejection_reasons, ..
        } => {
            let reason = rejection_reasons.get(&version.id).unwrap();
            assert!(reason.starts_with("awaiting"));
        }
        other => panic!("unexpected {other:?}"),
    }

    fx.catalog.record_approval(ApprovalRecord::approved(
        version.id,
        policy.id,
        "bob",
        ApprovalKind::Any,
        Utc::now(),
    ));
    let (_, chosen, _, _) = released(fx.evaluate(target).await);
    assert_eq!(chosen.id, version.id);
}

#[tokio::test]
async fn rejection_blocks_with_approver_in_reason() {
    let fx = Fixture::new();
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;
    let version = fx.add_version("v1", 5);
    let policy = fx.add_policy(
        Policy::new("one-approver", 1).with_approval(ApprovalRequirement::Any { required: 1 }),
    );
    fx.catalog.record_approval(ApprovalRecord::approved(
        version.id,
        policy.id,
        "alice",
        ApprovalKind::Any,
        Utc::now(),
    ));
    fx.catalog.record_approval(ApprovalRecord::rejected(
        version.id,
        policy.id,
        "mallory",
        Utc::now(),
        Some("failing canary".into()),
    ));

    match fx.evaluate(target).await {
        EvaluationOutcome::NoCandidate {
            rejection_reasons, ..
        } => {
            let reason = rejection_reasons.get(&version.id).unwrap();
            assert!(reason.contains("mallory"));
            assert!(reason.contains("failing canary"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn rollout_positions_and_offsets_for_four_targets() {
    let fx = Fixture::new();
    let resources: Vec<Resource> = (0..4).map(|i| fx.add_resource(&format!("node-{i}"))).collect();
    fx.reconcile().await;
    let version = fx.add_version("v1", 10);
    fx.add_policy(Policy::new("staged", 1).with_rollout(RolloutConfig {
        rollout_type: RolloutType::Linear,
        growth_factor: 1.0,
        time_scale_interval_minutes: 60,
    }));
    let snapshot = fx.engine.policy_snapshot().await.unwrap();

    let mut statuses = Vec::new();
    for resource in &resources {
        let targets = release_state::ReleaseTargetStore::targets_for_resource(
            fx.store.as_ref(),
            &resource.id,
        )
        .await
        .unwrap();
        let status = fx
            .engine
            .get_rollout_status(&targets[0].id, &version.id, &snapshot)
            .await
            .unwrap()
            .unwrap();
        // Stable across repeated calls.
        let again = fx
            .engine
            .get_rollout_status(&targets[0].id, &version.id, &snapshot)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, again);
        statuses.push(status);
    }

    statuses.sort_by_key(|s| s.position);
    let positions: Vec<usize> = statuses.iter().map(|s| s.position).collect();
    assert_eq!(positions, vec![0, 1, 2, 3]);
    for status in &statuses {
        assert_eq!(status.cohort_size, 4);
        assert_eq!(status.offset_seconds, Some(status.position as i64 * 15 * 60));
        assert_eq!(
            status.rollout_time,
            Some(floor_to_minute(version.created_at) + status.offset().unwrap())
        );
    }

    // Position 0 is open already; position 3 opens 45 minutes after start.
    let first = fx.evaluate(statuses[0].release_target_id).await;
    assert_eq!(released(first).1.id, version.id);
    match fx.evaluate(statuses[3].release_target_id).await {
        EvaluationOutcome::NoCandidate {
            rejection_reasons, ..
        } => assert!(rejection_reasons
            .get(&version.id)
            .unwrap()
            .starts_with("rollout begins at")),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn steep_exponential_rollout_puts_late_positions_beyond_horizon() {
    let fx = Fixture::new();
    for i in 0..64 {
        fx.add_resource(&format!("node-{i}"));
    }
    let change = fx.reconcile().await;
    assert_eq!(change.created.len(), 64);
    let version = fx.add_version("v1", 10);
    fx.add_policy(Policy::new("steep", 1).with_rollout(RolloutConfig {
        rollout_type: RolloutType::Exponential,
        growth_factor: 2.0,
        time_scale_interval_minutes: 60,
    }));
    let snapshot = fx.engine.policy_snapshot().await.unwrap();

    let mut released_count = 0;
    let mut beyond = 0;
    for target in &change.created {
        let status = fx
            .engine
            .get_rollout_status(&target.id, &version.id, &snapshot)
            .await
            .unwrap()
            .unwrap();
        match fx.engine.evaluate(target.id, &snapshot).await.unwrap() {
            EvaluationOutcome::Released { .. } => {
                assert!(status.is_eligible_at(Utc::now()));
                released_count += 1;
            }
            EvaluationOutcome::NoCandidate {
                rejection_reasons, ..
            } => {
                let reason = rejection_reasons.get(&version.id).unwrap();
                if status.slot() == RolloutSlot::BeyondHorizon {
                    assert_eq!(reason, "rollout time beyond horizon");
                    beyond += 1;
                } else {
                    assert!(reason.starts_with("rollout begins at"));
                }
            }
            other => panic!("unexpected {other:?}"),
        }
        if status.position == 63 {
            assert_eq!(status.offset_seconds, None);
            assert_eq!(status.rollout_time, None);
        }
    }
    assert!(released_count >= 1);
    assert!(beyond >= 1);
}

#[tokio::test]
async fn oversized_time_scale_is_rejected_at_upsert() {
    let fx = Fixture::new();
    let policy = Policy::new("forever", 1).with_rollout(RolloutConfig {
        rollout_type: RolloutType::Linear,
        growth_factor: 1.0,
        time_scale_interval_minutes: i64::MAX / 2,
    });
    let err = fx.catalog.upsert_policy(policy).unwrap_err();
    assert!(matches!(
        err,
        ReleaseError::Policy(PolicyConfigError::TimeScaleTooLarge { .. })
    ));
    assert!(fx.engine.policy_snapshot().await.unwrap().policies.is_empty());
}

#[tokio::test]
async fn rollout_status_is_none_without_rollout_policy() {
    let fx = Fixture::new();
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;
    let version = fx.add_version("v1", 10);
    let snapshot = fx.engine.policy_snapshot().await.unwrap();
    assert!(fx
        .engine
        .get_rollout_status(&target, &version.id, &snapshot)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn merged_concurrency_cap_is_the_minimum() {
    let fx = Fixture::new();
    let a = fx.add_resource("node-a");
    let b = fx.add_resource("node-b");
    fx.reconcile().await;
    let target_a = fx.target_for(&a).await;
    let target_b = fx.target_for(&b).await;
    fx.add_version("v1", 5);
    fx.add_policy(Policy::new("loose", 10).with_concurrency(5));
    fx.add_policy(Policy::new("strict", 5).with_concurrency(1));

    let (_, _, job_a, _) = released(fx.evaluate(target_a).await);
    match fx.evaluate(target_b).await {
        EvaluationOutcome::NoCandidate { blocked_by, .. } => {
            assert!(blocked_by.unwrap().contains("concurrency"));
        }
        other => panic!("unexpected {other:?}"),
    }

    // Finishing A frees the slot and re-queues the cohort.
    fx.engine
        .on_status_update(&job_a.id, JobUpdate::status(JobStatus::Successful))
        .await
        .unwrap();
    assert!(fx.engine.queue().len() >= 1);
    released(fx.evaluate(target_b).await);
}

#[tokio::test]
async fn held_lease_yields_pending_and_requeue() {
    let mut fx = Fixture::new();
    let mut receiver = fx.receiver.take().unwrap();
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;
    fx.add_version("v1", 5);
    receiver.drain();

    let lease = fx.engine.leases().try_acquire(target).unwrap();
    let outcome = fx.evaluate(target).await;
    assert!(outcome.is_pending());
    assert_eq!(fx.store.release_count().unwrap(), 0);
    drop(lease);

    assert_eq!(receiver.drain(), vec![target]);
    released(fx.evaluate(target).await);
}

#[tokio::test]
async fn deployment_without_agent_gets_invalid_job() {
    let fx = Fixture::build(RecordingExecutor::new(), false);
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;
    fx.add_version("v1", 5);

    let (_, _, job, _) = released(fx.evaluate(target).await);
    assert_eq!(job.status, JobStatus::InvalidJobAgent);
    assert!(job.message.unwrap().contains("no job agent"));
    assert!(fx.executor.dispatched().is_empty());
}

#[tokio::test]
async fn dispatch_failure_marks_job_invalid_integration() {
    let fx = Fixture::build(RecordingExecutor::failing("webhook returned 503"), true);
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;
    fx.add_version("v1", 5);

    let (_, _, job, _) = released(fx.evaluate(target).await);
    assert_eq!(job.status, JobStatus::InvalidIntegration);
    assert!(job.message.as_deref().unwrap().contains("503"));
    let stored = fx.store.get_job(&job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::InvalidIntegration);
}

#[tokio::test]
async fn job_status_lifecycle() {
    let fx = Fixture::new();
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;
    fx.add_version("v1", 5);
    let (_, _, job, _) = released(fx.evaluate(target).await);

    let running = fx
        .engine
        .on_status_update(
            &job.id,
            JobUpdate::status(JobStatus::InProgress).with_external_id("run-42"),
        )
        .await
        .unwrap();
    assert!(running.started_at.is_some());
    assert_eq!(running.external_id.as_deref(), Some("run-42"));

    let done = fx
        .engine
        .on_status_update(&job.id, JobUpdate::status(JobStatus::Failure).with_message("exit 1"))
        .await
        .unwrap();
    assert!(done.completed_at.is_some());
    assert_eq!(done.message.as_deref(), Some("exit 1"));

    let err = fx
        .engine
        .on_status_update(&job.id, JobUpdate::status(JobStatus::InProgress))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReleaseError::Storage(StorageError::InvalidJobTransition { .. })
    ));
}

#[tokio::test]
async fn pinned_release_is_reused() {
    let fx = Fixture::new();
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;
    let v1 = fx.add_version("v1", 30);
    let pinned = deploy(&fx, target).await;
    fx.add_version("v2", 10);
    let (latest, version, _, _) = released(fx.evaluate(target).await);
    assert_ne!(latest.id, pinned.id);
    assert_ne!(version.id, v1.id);

    fx.engine
        .set_desired_release(&target, Some(pinned.id))
        .await
        .unwrap();
    let (release, version, _, created) = released(fx.evaluate(target).await);
    assert_eq!(release.id, pinned.id);
    assert_eq!(version.id, v1.id);
    assert!(!created);

    fx.engine.set_desired_release(&target, None).await.unwrap();
    let (release, _, _, _) = released(fx.evaluate(target).await);
    assert_eq!(release.id, latest.id);
}

#[tokio::test]
async fn pinned_version_still_faces_policy() {
    let fx = Fixture::new();
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;
    fx.add_version("v1", 30);
    let pinned = deploy(&fx, target).await;
    fx.engine
        .set_desired_release(&target, Some(pinned.id))
        .await
        .unwrap();
    fx.add_policy(Policy::new("freeze", 1).with_deny_window(freeze_around_now()));

    assert!(matches!(
        fx.evaluate(target).await,
        EvaluationOutcome::NoCandidate { .. }
    ));
}

#[tokio::test]
async fn resolved_variables_are_captured_in_release() {
    use release_state::{DeploymentVariableId, VariableValueId};

    let fx = Fixture::new();
    let resource = fx.add_resource("node-1");
    let target = fx.target_for(&resource).await;
    fx.add_version("v1", 5);

    let default = VariableValue {
        id: VariableValueId::new(),
        value: serde_json::json!(2),
        resource_selector: None,
        priority: 0,
        sensitive: false,
    };
    let prod = VariableValue {
        id: VariableValueId::new(),
        value: serde_json::json!(6),
        resource_selector: Some(Condition::metadata_equals("env", "prod")),
        priority: 5,
        sensitive: false,
    };
    fx.catalog
        .upsert_variable(DeploymentVariable {
            id: DeploymentVariableId::new(),
            deployment_id: fx.deployment.id,
            key: "replicas".into(),
            description: None,
            values: vec![default.clone(), prod],
            default_value_id: Some(default.id),
        })
        .unwrap();

    let (release, _, _, _) = released(fx.evaluate(target).await);
    let variables = fx
        .store
        .get_variable_release(&release.variable_release_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(variables.values.len(), 1);
    assert_eq!(variables.values[0].value, serde_json::json!(6));

    // A resource-level value overrides and produces a new release.
    fx.catalog.set_resource_variable(ResourceVariable {
        resource_id: resource.id,
        key: "replicas".into(),
        value: serde_json::json!(1),
        sensitive: false,
    });
    let (second, _, _, created) = released(fx.evaluate(target).await);
    assert!(created);
    assert_eq!(second.version_release_id, release.version_release_id);
    assert_ne!(second.variable_release_id, release.variable_release_id);
}

#[tokio::test]
async fn evaluate_all_reports_every_target() {
    let fx = Fixture::new();
    for i in 0..5 {
        fx.add_resource(&format!("node-{i}"));
    }
    fx.reconcile().await;
    fx.add_version("v1", 5);

    let results = fx.engine.evaluate_every_target().await.unwrap();
    assert_eq!(results.len(), 5);
    assert!(results
        .iter()
        .all(|(_, r)| matches!(r, Ok(EvaluationOutcome::Released { .. }))));
    assert_eq!(fx.executor.dispatched().len(), 5);
}

#[tokio::test]
async fn worker_drains_queue_until_shutdown() {
    let mut fx = Fixture::new();
    let receiver = fx.receiver.take().unwrap();
    fx.add_resource("node-1");
    fx.add_version("v1", 5);
    // Reconciling queues the new target for evaluation.
    fx.reconcile().await;

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let worker = fx.engine.run_until(receiver, async {
        stop_rx.await.ok();
    });
    let driver = async {
        for _ in 0..200 {
            if !fx.executor.dispatched().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        stop_tx.send(()).ok();
    };
    tokio::join!(worker, driver);
    assert_eq!(fx.executor.dispatched().len(), 1);
}
