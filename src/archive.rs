use crate::error::OperationError;
use crate::github::CiProvider;
use crate::log_debug;
use crate::store::RecordStore;
use crate::types::{RecordHandle, RecordKey};

/// Reclaim the resources of a reconciled operation.
///
/// Deletes the tracking record first, then the CI branch named by the operation
/// id. There is no rollback: if the branch deletion fails the record is already
/// gone and the error reports `record_lost() == true`.
pub async fn archive<S: RecordStore, C: CiProvider>(
    store: &S,
    ci: &C,
    owner: &str,
    handle: &RecordHandle,
    key: &RecordKey,
) -> Result<(), OperationError> {
    store
        .delete(handle)
        .await
        .map_err(OperationError::DeleteRecord)?;
    log_debug!("[{}] Tracking record deleted", handle);

    ci.delete_branch(owner, &key.repository, &key.operation_id)
        .await
        .map_err(OperationError::DeleteBranch)?;
    log_debug!("[{}] Branch {} deleted", handle, key.operation_id);

    Ok(())
}
