use crate::error::OperationError;
use crate::types::{CompletionEventType, RecordKey, RunConclusion, TrackingRecord, WorkflowRun};

/// Why an operation was left pending this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingReason {
    /// No run carries the operation id as its branch name.
    NoMatchingRun,
    /// The first matching run has not concluded yet.
    RunInProgress { run_id: u64 },
}

/// Outcome of reconciling one operation against its repository's runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciliation {
    Pending(PendingReason),
    Resolved {
        event_type: CompletionEventType,
        run: WorkflowRun,
    },
}

// --- Payload identity ---

/// Return the payload's own key when it disagrees with the key it was stored under.
///
/// The storage key stays authoritative for matching and archiving; a mismatch is
/// only worth a warning.
pub fn payload_key_mismatch(record: &TrackingRecord, key: &RecordKey) -> Option<RecordKey> {
    let payload_key = record.key();
    (payload_key != *key).then_some(payload_key)
}

// --- Matching and classification: pure functions ---

/// Find the run correlated with `operation_id`.
///
/// Branch names compare as exact strings. When several runs share the branch,
/// the first in provider order wins.
pub fn find_run<'a>(operation_id: &str, runs: &'a [WorkflowRun]) -> Option<&'a WorkflowRun> {
    runs.iter().find(|run| run.branch_name.as_deref() == Some(operation_id))
}

/// Map a terminal conclusion to its completion event type.
///
/// | conclusion | event type |
/// |---|---|
/// | `Failure` | `SubscriptionConfigurationFailed` |
/// | `Success` | `SubscriptionConfigured` |
/// | `TimedOut` | `SubscriptionConfigurationTimedOut` |
///
/// Anything else is an `UnrecognizedConclusion` error for the caller to log.
pub fn classify(
    run_id: u64,
    conclusion: &RunConclusion,
) -> Result<CompletionEventType, OperationError> {
    match conclusion {
        RunConclusion::Failure => Ok(CompletionEventType::SubscriptionConfigurationFailed),
        RunConclusion::Success => Ok(CompletionEventType::SubscriptionConfigured),
        RunConclusion::TimedOut => Ok(CompletionEventType::SubscriptionConfigurationTimedOut),
        RunConclusion::Other(_) => Err(OperationError::UnrecognizedConclusion {
            run_id,
            conclusion: conclusion.clone(),
        }),
    }
}

/// Reconcile one operation: match by branch, then classify the run's conclusion.
///
/// A matched run that is still queued or in progress is treated as no match, so
/// classification only ever sees terminal runs.
pub fn reconcile(
    operation_id: &str,
    runs: &[WorkflowRun],
) -> Result<Reconciliation, OperationError> {
    let Some(run) = find_run(operation_id, runs) else {
        return Ok(Reconciliation::Pending(PendingReason::NoMatchingRun));
    };

    let Some(conclusion) = run.concluded() else {
        return Ok(Reconciliation::Pending(PendingReason::RunInProgress {
            run_id: run.id,
        }));
    };

    let event_type = classify(run.id, conclusion)?;
    Ok(Reconciliation::Resolved {
        event_type,
        run: run.clone(),
    })
}
