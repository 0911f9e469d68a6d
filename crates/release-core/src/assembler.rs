//! Idempotent release assembly inside a [`ReleaseTxn`].
//!
//! Every upsert first looks at what the target already has and only stages
//! an insert when the decision changed. The boolean in each result is
//! `true` when a new row was staged.

use release_state::{
    DeploymentVersionId, ReleaseRecord, ReleaseTxn, StorageResult, VariableSetReleaseId,
    VariableSetReleaseRecord, VariableSnapshot, VersionReleaseId, VersionReleaseRecord,
};

/// Reuse the latest version release when it already points at `version_id`.
pub async fn upsert_version_release(
    txn: &mut dyn ReleaseTxn,
    version_id: DeploymentVersionId,
) -> StorageResult<(VersionReleaseRecord, bool)> {
    if let Some(latest) = txn.latest_version_release().await? {
        if latest.version_id == version_id {
            return Ok((latest, false));
        }
    }
    let record = VersionReleaseRecord::new(txn.release_target_id(), version_id);
    txn.insert_version_release(record.clone());
    Ok((record, true))
}

/// Reuse the latest variable-set release when it holds exactly `values`.
pub async fn upsert_variable_release(
    txn: &mut dyn ReleaseTxn,
    values: Vec<VariableSnapshot>,
) -> StorageResult<(VariableSetReleaseRecord, bool)> {
    if let Some(latest) = txn.latest_variable_release().await? {
        if latest.has_same_values(&values) {
            return Ok((latest, false));
        }
    }
    let record = VariableSetReleaseRecord::new(txn.release_target_id(), values);
    txn.insert_variable_release(record.clone());
    Ok((record, true))
}

/// Return the release pairing both ids, staging one if none exists.
pub async fn upsert_release(
    txn: &mut dyn ReleaseTxn,
    version_release_id: VersionReleaseId,
    variable_release_id: VariableSetReleaseId,
) -> StorageResult<(ReleaseRecord, bool)> {
    if let Some(existing) = txn
        .find_release(&version_release_id, &variable_release_id)
        .await?
    {
        return Ok((existing, false));
    }
    let record = ReleaseRecord::new(
        txn.release_target_id(),
        version_release_id,
        variable_release_id,
    );
    txn.insert_release(record.clone());
    Ok((record, true))
}
