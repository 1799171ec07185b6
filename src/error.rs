use crate::types::RunConclusion;

/// Failure talking to the tracking-record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid continuation marker: {0}")]
    InvalidMarker(String),

    #[error("Store I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Failure talking to the CI provider.
#[derive(Debug, thiserror::Error)]
pub enum CiError {
    #[error("{operation} returned HTTP {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    #[error("{operation} failed: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} returned an unreadable body: {message}")]
    Decode { operation: String, message: String },

    #[error("CI provider error: {0}")]
    Other(String),
}

/// Failure delivering a completion event.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Event topic returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Event delivery failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Event publisher error: {0}")]
    Other(String),
}

/// Operation-local failure: logged, the operation stays pending, siblings continue.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("Failed to read tracking record: {0}")]
    Read(#[source] StoreError),

    #[error("Tracking record is not valid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Run {run_id} has unrecognized conclusion '{conclusion}'")]
    UnrecognizedConclusion {
        run_id: u64,
        conclusion: RunConclusion,
    },

    #[error("Failed to delete tracking record: {0}")]
    DeleteRecord(#[source] StoreError),

    #[error("Tracking record deleted but branch deletion failed: {0}")]
    DeleteBranch(#[source] CiError),

    #[error("Record and branch deleted but event publish failed: {0}")]
    Publish(#[source] PublishError),
}

impl OperationError {
    /// Returns true once the tracking record has already been removed.
    ///
    /// Such operations are gone from the store and will not be retried next cycle.
    pub fn record_lost(&self) -> bool {
        matches!(
            self,
            OperationError::DeleteBranch(_) | OperationError::Publish(_)
        )
    }

    /// Short stage label used in log lines.
    pub fn stage(&self) -> &'static str {
        match self {
            OperationError::Read(_) | OperationError::Decode(_) => "read",
            OperationError::UnrecognizedConclusion { .. } => "classify",
            OperationError::DeleteRecord(_) | OperationError::DeleteBranch(_) => "archive",
            OperationError::Publish(_) => "publish",
        }
    }
}

/// Cycle-fatal failure: aborts the remainder of the cycle.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("Failed to list tracking records: {0}")]
    ListRecords(#[source] StoreError),

    #[error("Failed to fetch runs for repository {repository}: {source}")]
    FetchRuns {
        repository: String,
        #[source]
        source: CiError,
    },
}

impl CycleError {
    pub fn repository(&self) -> Option<&str> {
        match self {
            CycleError::ListRecords(_) => None,
            CycleError::FetchRuns { repository, .. } => Some(repository),
        }
    }
}

/// Bridge for the CLI layer, which reports errors as strings.
impl From<CycleError> for String {
    fn from(err: CycleError) -> String {
        err.to_string()
    }
}

impl From<StoreError> for String {
    fn from(err: StoreError) -> String {
        err.to_string()
    }
}
