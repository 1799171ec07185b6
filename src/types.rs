use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Tracking records ---

/// Opaque reference to a stored tracking record, as returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordHandle {
    key: String,
}

impl RecordHandle {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for RecordHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// The `(repository, operation id)` pair encoded in a record key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordKey {
    pub repository: String,
    pub operation_id: String,
}

impl RecordKey {
    /// Parse `"{repository}/{operationId}"`.
    ///
    /// Returns `None` unless the key splits into exactly two non-empty segments.
    pub fn parse(key: &str) -> Option<Self> {
        let mut segments = key.split('/');
        let repository = segments.next()?;
        let operation_id = segments.next()?;
        if segments.next().is_some() || repository.is_empty() || operation_id.is_empty() {
            return None;
        }
        Some(Self {
            repository: repository.to_string(),
            operation_id: operation_id.to_string(),
        })
    }

    pub fn to_key(&self) -> String {
        format!("{}/{}", self.repository, self.operation_id)
    }
}

/// Persisted description of an in-flight provisioning operation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRecord {
    pub operation_id: String,
    pub repository_name: String,
    pub tenant_id: String,
    pub subscription_id: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl TrackingRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            repository: self.repository_name.clone(),
            operation_id: self.operation_id.clone(),
        }
    }
}

// --- CI runs ---

/// Lifecycle status of a workflow run as reported by the CI provider.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Other(String),
}

impl From<String> for RunStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "queued" => RunStatus::Queued,
            "in_progress" => RunStatus::InProgress,
            "completed" => RunStatus::Completed,
            _ => RunStatus::Other(value),
        }
    }
}

impl From<RunStatus> for String {
    fn from(value: RunStatus) -> Self {
        match value {
            RunStatus::Queued => "queued".to_string(),
            RunStatus::InProgress => "in_progress".to_string(),
            RunStatus::Completed => "completed".to_string(),
            RunStatus::Other(other) => other,
        }
    }
}

/// Terminal conclusion of a workflow run.
///
/// Closed over the three outcomes the reconciler understands; everything else
/// the provider may report lands in `Other`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum RunConclusion {
    Success,
    Failure,
    TimedOut,
    Other(String),
}

impl From<String> for RunConclusion {
    fn from(value: String) -> Self {
        match value.as_str() {
            "success" => RunConclusion::Success,
            "failure" => RunConclusion::Failure,
            "timed_out" => RunConclusion::TimedOut,
            _ => RunConclusion::Other(value),
        }
    }
}

impl From<RunConclusion> for String {
    fn from(value: RunConclusion) -> Self {
        match value {
            RunConclusion::Success => "success".to_string(),
            RunConclusion::Failure => "failure".to_string(),
            RunConclusion::TimedOut => "timed_out".to_string(),
            RunConclusion::Other(other) => other,
        }
    }
}

impl fmt::Display for RunConclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from(self.clone()))
    }
}

/// One workflow execution, correlated to an operation by branch name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    pub id: u64,
    pub branch_name: Option<String>,
    pub status: RunStatus,
    pub conclusion: Option<RunConclusion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
}

impl WorkflowRun {
    /// A run has concluded once the provider marks it completed with a conclusion.
    pub fn concluded(&self) -> Option<&RunConclusion> {
        match self.status {
            RunStatus::Completed => self.conclusion.as_ref(),
            _ => None,
        }
    }
}

// --- Completion events ---

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompletionEventType {
    SubscriptionConfigured,
    SubscriptionConfigurationFailed,
    SubscriptionConfigurationTimedOut,
}

impl CompletionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionEventType::SubscriptionConfigured => "SubscriptionConfigured",
            CompletionEventType::SubscriptionConfigurationFailed => {
                "SubscriptionConfigurationFailed"
            }
            CompletionEventType::SubscriptionConfigurationTimedOut => {
                "SubscriptionConfigurationTimedOut"
            }
        }
    }
}

impl fmt::Display for CompletionEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CompletionData {
    pub operation: TrackingRecord,
    pub run: WorkflowRun,
}

/// Terminal notification emitted once per reconciled operation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub id: Uuid,
    pub event_type: CompletionEventType,
    pub data_version: String,
    pub event_time: DateTime<Utc>,
    pub subject: String,
    pub data: CompletionData,
}

impl CompletionEvent {
    pub fn new(
        event_type: CompletionEventType,
        operation: TrackingRecord,
        run: WorkflowRun,
        data_version: &str,
        event_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            data_version: data_version.to_string(),
            event_time,
            subject: subject_for(&operation.tenant_id, &operation.subscription_id),
            data: CompletionData { operation, run },
        }
    }
}

pub fn subject_for(tenant_id: &str, subscription_id: &str) -> String {
    format!(
        "/saas/tenants/{}/subscriptions/{}",
        tenant_id, subscription_id
    )
}
