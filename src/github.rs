use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::error::CiError;
use crate::types::{RunConclusion, RunStatus, WorkflowRun};
use crate::{log_debug, log_warn};

/// GitHub REST API version pinned on every request.
const GITHUB_API_VERSION: &str = "2022-11-28";

/// Runs requested per repository. One page only; the newest runs come first.
const RUNS_PER_PAGE: u32 = 100;

/// CI provider operations the reconciler depends on. Enables mocking in cycle tests.
pub trait CiProvider: Send + Sync {
    /// Fetch the known workflow runs for a repository, in provider order.
    fn list_runs(
        &self,
        owner: &str,
        repository: &str,
    ) -> impl Future<Output = Result<Vec<WorkflowRun>, CiError>> + Send;

    /// Delete `refs/heads/{branch}`.
    fn delete_branch(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
    ) -> impl Future<Output = Result<(), CiError>> + Send;
}

// --- GitHub implementation ---

#[derive(Deserialize)]
struct RunsResponse {
    #[serde(default)]
    workflow_runs: Vec<ApiRun>,
}

#[derive(Deserialize)]
struct ApiRun {
    id: u64,
    head_branch: Option<String>,
    status: Option<String>,
    conclusion: Option<String>,
    html_url: Option<String>,
}

impl From<ApiRun> for WorkflowRun {
    fn from(run: ApiRun) -> Self {
        WorkflowRun {
            id: run.id,
            branch_name: run.head_branch,
            status: run
                .status
                .map(RunStatus::from)
                .unwrap_or_else(|| RunStatus::Other("unknown".to_string())),
            conclusion: run.conclusion.map(RunConclusion::from),
            html_url: run.html_url,
        }
    }
}

/// GitHub Actions client authenticated with a bearer token.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: Url,
}

impl GithubClient {
    pub fn new(
        api_base: &str,
        token: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, String> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent)
                .map_err(|e| format!("Invalid user agent '{}': {}", user_agent, e))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static(GITHUB_API_VERSION),
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|e| format!("Invalid GitHub token header: {}", e))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build GitHub HTTP client: {}", e))?;

        let api_base = Url::parse(api_base.trim_end_matches('/'))
            .map_err(|e| format!("Invalid GitHub API URL '{}': {}", api_base, e))?;
        if api_base.cannot_be_a_base() {
            return Err(format!("Invalid GitHub API URL '{}': not a base URL", api_base));
        }

        Ok(Self { http, api_base })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

impl CiProvider for GithubClient {
    async fn list_runs(&self, owner: &str, repository: &str) -> Result<Vec<WorkflowRun>, CiError> {
        let operation = format!("list runs for {}/{}", owner, repository);
        let mut url = self.endpoint(&["repos", owner, repository, "actions", "runs"]);
        url.query_pairs_mut()
            .append_pair("per_page", &RUNS_PER_PAGE.to_string());

        log_debug!("[github] GET {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| CiError::Transport {
                operation: operation.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CiError::Status {
                operation,
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: RunsResponse = response.json().await.map_err(|e| CiError::Decode {
            operation: operation.clone(),
            message: e.to_string(),
        })?;

        Ok(parsed
            .workflow_runs
            .into_iter()
            .map(WorkflowRun::from)
            .collect())
    }

    async fn delete_branch(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
    ) -> Result<(), CiError> {
        let operation = format!("delete branch {} in {}/{}", branch, owner, repository);
        let url = self.endpoint(&["repos", owner, repository, "git", "refs", "heads", branch]);

        log_debug!("[github] DELETE {}", url);
        let response = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(|source| CiError::Transport {
                operation: operation.clone(),
                source,
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        // GitHub answers 422 "Reference does not exist" for refs that are already gone
        if status == StatusCode::NOT_FOUND || status == StatusCode::UNPROCESSABLE_ENTITY {
            log_warn!(
                "[github] Branch {} in {}/{} already absent (HTTP {}), treating as deleted",
                branch,
                owner,
                repository,
                status.as_u16()
            );
            return Ok(());
        }

        Err(CiError::Status {
            operation,
            status: status.as_u16(),
            body: truncate_body(&body),
        })
    }
}

fn truncate_body(body: &str) -> String {
    const MAX_BODY_CHARS: usize = 500;
    if body.chars().count() <= MAX_BODY_CHARS {
        return body.to_string();
    }
    let truncated: String = body.chars().take(MAX_BODY_CHARS).collect();
    format!("{}...", truncated)
}

// --- Mock implementation ---

/// Mock CI provider for cycle tests.
///
/// Serves a configured run list (or a failure) per repository and records every
/// call so tests can assert which repositories were visited and which branches
/// were deleted.
#[derive(Default)]
pub struct MockCiProvider {
    runs: Mutex<HashMap<String, Result<Vec<WorkflowRun>, String>>>,
    fail_branch_deletes: Mutex<HashSet<String>>,
    listed: Mutex<Vec<String>>,
    deleted_branches: Mutex<Vec<(String, String)>>,
}

impl MockCiProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runs(self, repository: &str, runs: Vec<WorkflowRun>) -> Self {
        if let Ok(mut map) = self.runs.lock() {
            map.insert(repository.to_string(), Ok(runs));
        }
        self
    }

    /// Make `list_runs` for `repository` fail as an HTTP 502.
    pub fn with_listing_failure(self, repository: &str, message: &str) -> Self {
        if let Ok(mut map) = self.runs.lock() {
            map.insert(repository.to_string(), Err(message.to_string()));
        }
        self
    }

    pub fn with_branch_delete_failure(self, branch: &str) -> Self {
        if let Ok(mut set) = self.fail_branch_deletes.lock() {
            set.insert(branch.to_string());
        }
        self
    }

    /// Repositories passed to `list_runs`, in call order.
    pub fn listed_repositories(&self) -> Vec<String> {
        self.listed.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// `(repository, branch)` pairs passed to `delete_branch`, in call order.
    pub fn deleted_branches(&self) -> Vec<(String, String)> {
        self.deleted_branches
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }
}

impl CiProvider for MockCiProvider {
    async fn list_runs(&self, owner: &str, repository: &str) -> Result<Vec<WorkflowRun>, CiError> {
        if let Ok(mut listed) = self.listed.lock() {
            listed.push(repository.to_string());
        }

        let configured = self
            .runs
            .lock()
            .map_err(|_| CiError::Other("mock lock poisoned".to_string()))?
            .get(repository)
            .cloned();

        match configured {
            Some(Ok(runs)) => Ok(runs),
            Some(Err(message)) => Err(CiError::Status {
                operation: format!("list runs for {}/{}", owner, repository),
                status: 502,
                body: message,
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn delete_branch(
        &self,
        owner: &str,
        repository: &str,
        branch: &str,
    ) -> Result<(), CiError> {
        if let Ok(mut deleted) = self.deleted_branches.lock() {
            deleted.push((repository.to_string(), branch.to_string()));
        }

        let should_fail = self
            .fail_branch_deletes
            .lock()
            .map(|set| set.contains(branch))
            .unwrap_or(false);
        if should_fail {
            return Err(CiError::Status {
                operation: format!("delete branch {} in {}/{}", branch, owner, repository),
                status: 500,
                body: "injected branch delete failure".to_string(),
            });
        }
        Ok(())
    }
}
