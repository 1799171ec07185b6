#![allow(dead_code)]

use provision_reconciler::events::RecordingPublisher;
use provision_reconciler::github::MockCiProvider;
use provision_reconciler::orchestrator::{CycleSettings, Orchestrator};
use provision_reconciler::store::MemoryRecordStore;
use provision_reconciler::types::{RunConclusion, RunStatus, TrackingRecord, WorkflowRun};

pub const OWNER: &str = "acme";
pub const DATA_VERSION: &str = "1.0";

/// Creates a `TrackingRecord` whose payload matches the `repository/operation_id` key.
pub fn make_record(
    repository: &str,
    operation_id: &str,
    tenant: &str,
    subscription: &str,
) -> TrackingRecord {
    TrackingRecord {
        operation_id: operation_id.to_string(),
        repository_name: repository.to_string(),
        tenant_id: tenant.to_string(),
        subscription_id: subscription.to_string(),
        metadata: serde_json::Map::new(),
    }
}

/// Creates a completed run on `branch` with the given conclusion.
pub fn completed_run(id: u64, branch: &str, conclusion: RunConclusion) -> WorkflowRun {
    WorkflowRun {
        id,
        branch_name: Some(branch.to_string()),
        status: RunStatus::Completed,
        conclusion: Some(conclusion),
        html_url: None,
    }
}

/// Creates a run on `branch` that has not concluded.
pub fn in_progress_run(id: u64, branch: &str) -> WorkflowRun {
    WorkflowRun {
        id,
        branch_name: Some(branch.to_string()),
        status: RunStatus::InProgress,
        conclusion: None,
        html_url: None,
    }
}

/// Creates a memory store seeded with a well-formed record for each `repository/operation` key.
pub fn seeded_store(keys: &[&str]) -> MemoryRecordStore {
    let store = MemoryRecordStore::new(2);
    for key in keys {
        let (repository, operation_id) = key.split_once('/').expect("key with separator");
        store.insert_record(key, &make_record(repository, operation_id, "t1", "s1"));
    }
    store
}

pub fn settings() -> CycleSettings {
    CycleSettings {
        owner: OWNER.to_string(),
        data_version: DATA_VERSION.to_string(),
    }
}

pub type TestOrchestrator = Orchestrator<MemoryRecordStore, MockCiProvider, RecordingPublisher>;

pub fn orchestrator(store: MemoryRecordStore, ci: MockCiProvider) -> TestOrchestrator {
    Orchestrator::new(store, ci, RecordingPublisher::new(), settings())
}
