use std::collections::BTreeMap;
use std::time::Instant;

use uuid::Uuid;

use crate::archive;
use crate::error::{CycleError, OperationError};
use crate::events::EventPublisher;
use crate::github::CiProvider;
use crate::reconcile::{self, PendingReason, Reconciliation};
use crate::store::{self, RecordStore};
use crate::types::{CompletionEvent, CompletionEventType, RecordHandle, RecordKey, WorkflowRun};
use crate::{log_debug, log_error, log_info, log_warn};

/// Settings the orchestrator needs from configuration, resolved once at start-up.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSettings {
    /// Owner (user or organization) of every tracked repository.
    pub owner: String,
    /// Version tag stamped on every completion event.
    pub data_version: String,
}

// --- Outcomes ---

#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    Resolved {
        event_type: CompletionEventType,
        event_id: Uuid,
        run_id: u64,
    },
    Pending(PendingReason),
}

#[derive(Debug)]
pub struct OperationReport {
    pub operation_id: String,
    pub result: Result<OperationOutcome, OperationError>,
}

/// Outcomes of every operation in one repository.
#[derive(Debug)]
pub struct RepositoryBatch {
    pub repository: String,
    pub operations: Vec<OperationReport>,
}

impl RepositoryBatch {
    pub fn resolved(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op.result, Ok(OperationOutcome::Resolved { .. })))
            .count()
    }

    pub fn pending(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op.result, Ok(OperationOutcome::Pending(_))))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.operations.iter().filter(|op| op.result.is_err()).count()
    }

    pub fn report(&self, operation_id: &str) -> Option<&OperationReport> {
        self.operations
            .iter()
            .find(|op| op.operation_id == operation_id)
    }
}

/// Result of a completed cycle, returned to the caller for summary display.
#[derive(Debug, Default)]
pub struct CycleSummary {
    pub batches: Vec<RepositoryBatch>,
    pub malformed_keys: Vec<String>,
}

impl CycleSummary {
    pub fn resolved(&self) -> usize {
        self.batches.iter().map(RepositoryBatch::resolved).sum()
    }

    pub fn pending(&self) -> usize {
        self.batches.iter().map(RepositoryBatch::pending).sum()
    }

    pub fn failed(&self) -> usize {
        self.batches.iter().map(RepositoryBatch::failed).sum()
    }

    pub fn batch(&self, repository: &str) -> Option<&RepositoryBatch> {
        self.batches.iter().find(|b| b.repository == repository)
    }
}

// --- Orchestrator ---

/// Drives one reconciliation cycle over the pending operations in `store`.
///
/// Processing is strictly sequential: repositories in key order, then their
/// operations in key order.
pub struct Orchestrator<S, C, P> {
    store: S,
    ci: C,
    publisher: P,
    settings: CycleSettings,
}

impl<S, C, P> Orchestrator<S, C, P>
where
    S: RecordStore,
    C: CiProvider,
    P: EventPublisher,
{
    pub fn new(store: S, ci: C, publisher: P, settings: CycleSettings) -> Self {
        Self {
            store,
            ci,
            publisher,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ci(&self) -> &C {
        &self.ci
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Run one cycle.
    ///
    /// Operation-level failures are logged and reported in the summary. Listing
    /// failures and run-fetch failures are logged here and returned, abandoning
    /// every repository not yet visited.
    pub async fn run_cycle(&self) -> Result<CycleSummary, CycleError> {
        let started = Instant::now();
        match self.try_run_cycle().await {
            Ok(summary) => {
                log_info!(
                    "[cycle] Complete in {}ms: {} resolved, {} pending, {} failed, {} malformed key(s) skipped",
                    started.elapsed().as_millis(),
                    summary.resolved(),
                    summary.pending(),
                    summary.failed(),
                    summary.malformed_keys.len()
                );
                Ok(summary)
            }
            Err(err) => {
                log_error!(
                    "[cycle] Aborted after {}ms: {}",
                    started.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    async fn try_run_cycle(&self) -> Result<CycleSummary, CycleError> {
        let handles = store::list_pending(&self.store)
            .await
            .map_err(CycleError::ListRecords)?;
        let pending = store::group_by_repository(handles);

        for handle in &pending.malformed {
            log_debug!("[cycle] Ignoring malformed key '{}'", handle);
        }
        log_info!(
            "[cycle] {} pending operation(s) across {} repositories",
            pending.operation_count(),
            pending.by_repository.len()
        );

        let mut summary = CycleSummary {
            batches: Vec::with_capacity(pending.by_repository.len()),
            malformed_keys: pending
                .malformed
                .iter()
                .map(|h| h.key().to_string())
                .collect(),
        };

        for (repository, operations) in &pending.by_repository {
            let batch = self.reconcile_repository(repository, operations).await?;
            summary.batches.push(batch);
        }

        Ok(summary)
    }

    async fn reconcile_repository(
        &self,
        repository: &str,
        operations: &BTreeMap<String, RecordHandle>,
    ) -> Result<RepositoryBatch, CycleError> {
        let runs = self
            .ci
            .list_runs(&self.settings.owner, repository)
            .await
            .map_err(|source| CycleError::FetchRuns {
                repository: repository.to_string(),
                source,
            })?;
        log_debug!(
            "[{}] {} run(s) fetched for {} pending operation(s)",
            repository,
            runs.len(),
            operations.len()
        );

        let mut batch = RepositoryBatch {
            repository: repository.to_string(),
            operations: Vec::with_capacity(operations.len()),
        };

        for (operation_id, handle) in operations {
            let key = RecordKey {
                repository: repository.to_string(),
                operation_id: operation_id.clone(),
            };
            let result = self.process_operation(handle, &key, &runs).await;
            log_outcome(handle, &result);
            batch.operations.push(OperationReport {
                operation_id: operation_id.clone(),
                result,
            });
        }

        Ok(batch)
    }

    /// Read → match → classify → archive → publish.
    async fn process_operation(
        &self,
        handle: &RecordHandle,
        key: &RecordKey,
        runs: &[WorkflowRun],
    ) -> Result<OperationOutcome, OperationError> {
        let record = store::read_record(&self.store, handle).await?;
        if let Some(payload_key) = reconcile::payload_key_mismatch(&record, key) {
            log_warn!(
                "[{}] Record payload names {}; using the storage key",
                handle,
                payload_key.to_key()
            );
        }

        let (event_type, run) = match reconcile::reconcile(&key.operation_id, runs)? {
            Reconciliation::Pending(reason) => return Ok(OperationOutcome::Pending(reason)),
            Reconciliation::Resolved { event_type, run } => (event_type, run),
        };

        archive::archive(&self.store, &self.ci, &self.settings.owner, handle, key).await?;

        let run_id = run.id;
        let event = CompletionEvent::new(
            event_type,
            record,
            run,
            &self.settings.data_version,
            chrono::Utc::now(),
        );
        self.publisher
            .publish(&event)
            .await
            .map_err(OperationError::Publish)?;

        Ok(OperationOutcome::Resolved {
            event_type,
            event_id: event.id,
            run_id,
        })
    }
}

fn log_outcome(handle: &RecordHandle, result: &Result<OperationOutcome, OperationError>) {
    match result {
        Ok(OperationOutcome::Resolved {
            event_type,
            event_id,
            run_id,
        }) => {
            log_info!(
                "[{}] Resolved as {} (run {}, event {})",
                handle,
                event_type,
                run_id,
                event_id
            );
        }
        Ok(OperationOutcome::Pending(PendingReason::NoMatchingRun)) => {
            log_debug!("[{}] No matching run yet", handle);
        }
        Ok(OperationOutcome::Pending(PendingReason::RunInProgress { run_id })) => {
            log_debug!("[{}] Run {} has not concluded", handle, run_id);
        }
        Err(err) => {
            log_error!("[{}] {} failed: {}", handle, err.stage(), err);
            if err.record_lost() {
                log_warn!(
                    "[{}] Tracking record was already deleted; no completion event will be delivered",
                    handle
                );
            }
        }
    }
}
