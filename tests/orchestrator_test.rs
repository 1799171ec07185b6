mod common;

use common::{completed_run, in_progress_run, make_record, orchestrator, seeded_store};
use provision_reconciler::error::{CycleError, OperationError};
use provision_reconciler::events::RecordingPublisher;
use provision_reconciler::github::MockCiProvider;
use provision_reconciler::orchestrator::{Orchestrator, OperationOutcome};
use provision_reconciler::reconcile::PendingReason;
use provision_reconciler::store::MemoryRecordStore;
use provision_reconciler::types::{CompletionEventType, RunConclusion};

// =============================================================================
// End-to-end cycles
// =============================================================================

#[tokio::test]
async fn successful_run_resolves_archives_and_publishes() {
    let store = MemoryRecordStore::default();
    store.insert_record("repoX/abc123", &make_record("repoX", "abc123", "t1", "s1"));
    let ci = MockCiProvider::new().with_runs(
        "repoX",
        vec![completed_run(101, "abc123", RunConclusion::Success)],
    );
    let orch = orchestrator(store, ci);

    let summary = orch.run_cycle().await.unwrap();

    assert_eq!(summary.resolved(), 1);
    let events = orch.publisher().events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, CompletionEventType::SubscriptionConfigured);
    assert_eq!(events[0].subject, "/saas/tenants/t1/subscriptions/s1");
    assert_eq!(events[0].data_version, common::DATA_VERSION);
    assert_eq!(events[0].data.run.id, 101);
    assert_eq!(events[0].data.operation.operation_id, "abc123");

    assert!(!orch.store().contains("repoX/abc123"));
    assert_eq!(
        orch.ci().deleted_branches(),
        vec![("repoX".to_string(), "abc123".to_string())]
    );

    let report = summary.batch("repoX").unwrap().report("abc123").unwrap();
    match report.result.as_ref().unwrap() {
        OperationOutcome::Resolved {
            event_type,
            event_id,
            run_id,
        } => {
            assert_eq!(*event_type, CompletionEventType::SubscriptionConfigured);
            assert_eq!(*event_id, events[0].id);
            assert_eq!(*run_id, 101);
        }
        other => panic!("expected resolution, got {:?}", other),
    }
}

#[tokio::test]
async fn malformed_key_is_never_processed() {
    let store = MemoryRecordStore::default();
    store.insert_raw("malformed", "{}");
    let orch = orchestrator(store, MockCiProvider::new());

    let summary = orch.run_cycle().await.unwrap();

    assert_eq!(summary.malformed_keys, vec!["malformed"]);
    assert!(summary.batches.is_empty());
    assert!(orch.ci().listed_repositories().is_empty());
    assert!(orch.ci().deleted_branches().is_empty());
    assert!(orch.publisher().events().is_empty());
    assert!(orch.store().contains("malformed"));
}

#[tokio::test]
async fn only_operations_with_matching_runs_resolve() {
    let store = seeded_store(&["repoX/abc123", "repoX/xyz999"]);
    let ci = MockCiProvider::new().with_runs(
        "repoX",
        vec![completed_run(7, "abc123", RunConclusion::Failure)],
    );
    let orch = orchestrator(store, ci);

    let summary = orch.run_cycle().await.unwrap();

    let events = orch.publisher().events();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].event_type,
        CompletionEventType::SubscriptionConfigurationFailed
    );
    assert_eq!(events[0].data.operation.operation_id, "abc123");

    let batch = summary.batch("repoX").unwrap();
    assert_eq!(batch.resolved(), 1);
    assert_eq!(batch.pending(), 1);
    assert!(matches!(
        batch.report("xyz999").unwrap().result,
        Ok(OperationOutcome::Pending(PendingReason::NoMatchingRun))
    ));
    assert!(orch.store().contains("repoX/xyz999"));
    assert!(!orch.store().contains("repoX/abc123"));
}

#[tokio::test]
async fn run_fetch_failure_aborts_remaining_repositories() {
    let store = seeded_store(&["repoX/a1", "repoY/b1", "repoZ/c1"]);
    let ci = MockCiProvider::new()
        .with_runs("repoX", vec![completed_run(1, "a1", RunConclusion::Success)])
        .with_listing_failure("repoY", "bad gateway")
        .with_runs("repoZ", vec![completed_run(3, "c1", RunConclusion::Success)]);
    let orch = orchestrator(store, ci);

    let err = orch.run_cycle().await.unwrap_err();

    assert!(matches!(err, CycleError::FetchRuns { .. }));
    assert_eq!(err.repository(), Some("repoY"));
    // repoX ran to completion before the failure; repoZ was never visited
    assert_eq!(orch.ci().listed_repositories(), vec!["repoX", "repoY"]);
    assert!(!orch.store().contains("repoX/a1"));
    assert!(orch.store().contains("repoY/b1"));
    assert!(orch.store().contains("repoZ/c1"));
    assert_eq!(orch.publisher().events().len(), 1);
}

// =============================================================================
// Operation-local failures
// =============================================================================

#[tokio::test]
async fn unrecognized_conclusion_leaves_operation_and_continues() {
    let store = seeded_store(&["repoX/a1", "repoX/a2"]);
    let ci = MockCiProvider::new().with_runs(
        "repoX",
        vec![
            completed_run(1, "a1", RunConclusion::Other("cancelled".to_string())),
            completed_run(2, "a2", RunConclusion::Success),
        ],
    );
    let orch = orchestrator(store, ci);

    let summary = orch.run_cycle().await.unwrap();

    let batch = summary.batch("repoX").unwrap();
    assert!(matches!(
        batch.report("a1").unwrap().result,
        Err(OperationError::UnrecognizedConclusion { run_id: 1, .. })
    ));
    assert_eq!(batch.resolved(), 1);
    assert!(orch.store().contains("repoX/a1"));
    assert_eq!(
        orch.ci().deleted_branches(),
        vec![("repoX".to_string(), "a2".to_string())]
    );
}

#[tokio::test]
async fn read_failure_is_isolated_to_its_operation() {
    let store = seeded_store(&["repoX/a1", "repoX/a2"]);
    store.fail_read("repoX/a1");
    let ci = MockCiProvider::new().with_runs(
        "repoX",
        vec![
            completed_run(1, "a1", RunConclusion::Success),
            completed_run(2, "a2", RunConclusion::Success),
        ],
    );
    let orch = orchestrator(store, ci);

    let summary = orch.run_cycle().await.unwrap();

    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.resolved(), 1);
    assert!(orch.store().contains("repoX/a1"));
    assert_eq!(orch.publisher().events().len(), 1);
}

#[tokio::test]
async fn undecodable_record_is_isolated_to_its_operation() {
    let store = seeded_store(&["repoX/a2"]);
    store.insert_raw("repoX/a1", "{ not json");
    let ci = MockCiProvider::new().with_runs(
        "repoX",
        vec![
            completed_run(1, "a1", RunConclusion::Success),
            completed_run(2, "a2", RunConclusion::Success),
        ],
    );
    let orch = orchestrator(store, ci);

    let summary = orch.run_cycle().await.unwrap();

    let batch = summary.batch("repoX").unwrap();
    assert!(matches!(
        batch.report("a1").unwrap().result,
        Err(OperationError::Decode(_))
    ));
    assert_eq!(batch.resolved(), 1);
    assert!(orch.store().contains("repoX/a1"));
}

#[tokio::test]
async fn payload_naming_another_key_still_resolves_by_storage_key() {
    let store = MemoryRecordStore::default();
    store.insert_record("repoX/abc123", &make_record("RepoX", "abc123", "t1", "s1"));
    let ci = MockCiProvider::new().with_runs(
        "repoX",
        vec![completed_run(1, "abc123", RunConclusion::Success)],
    );
    let orch = orchestrator(store, ci);

    let first = orch.run_cycle().await.unwrap();
    let second = orch.run_cycle().await.unwrap();

    assert_eq!(first.resolved(), 1);
    assert!(second.batches.is_empty());
    assert!(!orch.store().contains("repoX/abc123"));
    assert_eq!(
        orch.ci().deleted_branches(),
        vec![("repoX".to_string(), "abc123".to_string())]
    );
    let events = orch.publisher().events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, CompletionEventType::SubscriptionConfigured);
    assert_eq!(events[0].subject, "/saas/tenants/t1/subscriptions/s1");
}

#[tokio::test]
async fn publish_failure_after_archive_loses_the_record() {
    let store = seeded_store(&["repoX/abc123"]);
    let ci = MockCiProvider::new().with_runs(
        "repoX",
        vec![completed_run(1, "abc123", RunConclusion::Success)],
    );
    let orch = Orchestrator::new(store, ci, RecordingPublisher::failing(), common::settings());

    let summary = orch.run_cycle().await.unwrap();

    let result = &summary.batch("repoX").unwrap().report("abc123").unwrap().result;
    let err = result.as_ref().unwrap_err();
    assert!(matches!(err, OperationError::Publish(_)));
    assert!(err.record_lost());
    assert!(!orch.store().contains("repoX/abc123"));
    assert_eq!(orch.ci().deleted_branches().len(), 1);
    assert!(orch.publisher().events().is_empty());

    // The record is gone, so the next cycle has nothing to retry
    let next = orch.run_cycle().await.unwrap();
    assert!(next.batches.is_empty());
}

#[tokio::test]
async fn branch_delete_failure_skips_publish() {
    let store = seeded_store(&["repoX/abc123"]);
    let ci = MockCiProvider::new()
        .with_runs(
            "repoX",
            vec![completed_run(1, "abc123", RunConclusion::TimedOut)],
        )
        .with_branch_delete_failure("abc123");
    let orch = orchestrator(store, ci);

    let summary = orch.run_cycle().await.unwrap();

    assert_eq!(summary.failed(), 1);
    assert!(!orch.store().contains("repoX/abc123"));
    assert!(orch.publisher().events().is_empty());
}

// =============================================================================
// Cycle-level behavior
// =============================================================================

#[tokio::test]
async fn listing_failure_is_cycle_fatal() {
    let store = seeded_store(&["repoX/abc123"]);
    store.fail_listing("container unavailable");
    let orch = orchestrator(store, MockCiProvider::new());

    let err = orch.run_cycle().await.unwrap_err();

    assert!(matches!(err, CycleError::ListRecords(_)));
    assert_eq!(err.repository(), None);
    assert!(orch.ci().listed_repositories().is_empty());
}

#[tokio::test]
async fn in_progress_run_stays_pending_until_it_concludes() {
    let store = seeded_store(&["repoX/abc123"]);
    let ci = MockCiProvider::new().with_runs("repoX", vec![in_progress_run(5, "abc123")]);
    let orch = orchestrator(store, ci);

    let summary = orch.run_cycle().await.unwrap();

    assert_eq!(summary.pending(), 1);
    assert!(orch.store().contains("repoX/abc123"));
    assert!(orch.ci().deleted_branches().is_empty());
}

#[tokio::test]
async fn repositories_are_fetched_once_each_in_key_order() {
    let store = seeded_store(&["repoB/b1", "repoA/a2", "repoA/a1", "repoC/c1"]);
    let orch = orchestrator(store, MockCiProvider::new());

    let summary = orch.run_cycle().await.unwrap();

    assert_eq!(
        orch.ci().listed_repositories(),
        vec!["repoA", "repoB", "repoC"]
    );
    assert_eq!(summary.pending(), 4);
    let order: Vec<&str> = summary
        .batch("repoA")
        .unwrap()
        .operations
        .iter()
        .map(|op| op.operation_id.as_str())
        .collect();
    assert_eq!(order, vec!["a1", "a2"]);
}

#[tokio::test]
async fn malformed_key_persists_across_cycles() {
    let store = seeded_store(&["repoX/abc123"]);
    store.insert_raw("a/b/c", "{}");
    let ci = MockCiProvider::new().with_runs(
        "repoX",
        vec![completed_run(1, "abc123", RunConclusion::Success)],
    );
    let orch = orchestrator(store, ci);

    let first = orch.run_cycle().await.unwrap();
    let second = orch.run_cycle().await.unwrap();

    assert_eq!(first.resolved(), 1);
    assert_eq!(first.malformed_keys, vec!["a/b/c"]);
    assert_eq!(second.malformed_keys, vec!["a/b/c"]);
    assert_eq!(orch.store().keys(), vec!["a/b/c"]);
    assert_eq!(orch.publisher().events().len(), 1);
}

#[tokio::test]
async fn empty_store_completes_with_nothing_to_do() {
    let orch = orchestrator(MemoryRecordStore::default(), MockCiProvider::new());

    let summary = orch.run_cycle().await.unwrap();

    assert_eq!(summary.resolved() + summary.pending() + summary.failed(), 0);
    assert!(orch.ci().listed_repositories().is_empty());
}
