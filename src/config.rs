use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "reconciler.toml";

// Environment variables consulted once at start-up.
pub const ENV_GITHUB_TOKEN: &str = "GITHUB_TOKEN";
pub const ENV_GITHUB_OWNER: &str = "RECONCILER_GITHUB_OWNER";
pub const ENV_STORE_ROOT: &str = "RECONCILER_STORE_ROOT";
pub const ENV_CONTAINER: &str = "RECONCILER_CONTAINER";
pub const ENV_EVENTS_ENDPOINT: &str = "RECONCILER_EVENTS_ENDPOINT";
pub const ENV_EVENTS_KEY: &str = "RECONCILER_EVENTS_KEY";

#[derive(Default, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub github: GithubConfig,
    pub store: StoreConfig,
    pub events: EventsConfig,
    pub schedule: ScheduleConfig,
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GithubConfig {
    pub owner: String,
    pub api_url: String,
    pub token: Option<String>,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the record containers.
    pub root: PathBuf,
    pub container: String,
    pub page_size: usize,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct EventsConfig {
    pub endpoint: String,
    pub key: Option<String>,
    pub data_version: String,
    pub request_timeout_secs: u64,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_minutes: u64,
}

#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory for the host-local lock and PID file.
    pub lock_dir: PathBuf,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            owner: String::new(),
            api_url: "https://api.github.com".to_string(),
            token: None,
            user_agent: "provision-reconciler".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
            container: "pending-operations".to_string(),
            page_size: crate::store::DEFAULT_PAGE_SIZE,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            key: None,
            data_version: "1.0".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 5,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            lock_dir: PathBuf::from(".provision-reconciler"),
        }
    }
}

impl GithubConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl EventsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

/// Overlay environment-provided values onto a parsed config.
///
/// `lookup` is `std::env::var` in production; tests pass a map. Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut ReconcilerConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(token) = get(ENV_GITHUB_TOKEN) {
        config.github.token = Some(token);
    }
    if let Some(owner) = get(ENV_GITHUB_OWNER) {
        config.github.owner = owner;
    }
    if let Some(root) = get(ENV_STORE_ROOT) {
        config.store.root = PathBuf::from(root);
    }
    if let Some(container) = get(ENV_CONTAINER) {
        config.store.container = container;
    }
    if let Some(endpoint) = get(ENV_EVENTS_ENDPOINT) {
        config.events.endpoint = endpoint;
    }
    if let Some(key) = get(ENV_EVENTS_KEY) {
        config.events.key = Some(key);
    }
}

pub fn validate(config: &ReconcilerConfig) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.github.owner.trim().is_empty() {
        errors.push(format!(
            "github.owner must be set (or {})",
            ENV_GITHUB_OWNER
        ));
    }

    if config.github.owner.contains('/') {
        errors.push("github.owner must not contain '/'".to_string());
    }

    if !config.github.api_url.starts_with("http://") && !config.github.api_url.starts_with("https://")
    {
        errors.push(format!(
            "github.api_url must be an http(s) URL, got '{}'",
            config.github.api_url
        ));
    }

    if config
        .github
        .token
        .as_deref()
        .map_or(true, |t| t.trim().is_empty())
    {
        errors.push(format!(
            "github.token must be set (or {})",
            ENV_GITHUB_TOKEN
        ));
    }

    if config.github.request_timeout_secs == 0 {
        errors.push("github.request_timeout_secs must be >= 1".to_string());
    }

    if config.store.container.trim().is_empty() {
        errors.push(format!(
            "store.container must be set (or {})",
            ENV_CONTAINER
        ));
    }

    if config.store.container.contains('/') {
        errors.push("store.container must not contain '/'".to_string());
    }

    if config.store.page_size < 1 {
        errors.push("store.page_size must be >= 1".to_string());
    }

    if config.events.endpoint.trim().is_empty() {
        errors.push(format!(
            "events.endpoint must be set (or {})",
            ENV_EVENTS_ENDPOINT
        ));
    } else if !config.events.endpoint.starts_with("http://")
        && !config.events.endpoint.starts_with("https://")
    {
        errors.push(format!(
            "events.endpoint must be an http(s) URL, got '{}'",
            config.events.endpoint
        ));
    }

    if config.events.data_version.trim().is_empty() {
        errors.push("events.data_version must not be empty".to_string());
    }

    if config.events.request_timeout_secs == 0 {
        errors.push("events.request_timeout_secs must be >= 1".to_string());
    }

    if config.schedule.interval_minutes < 1 {
        errors.push("schedule.interval_minutes must be >= 1".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Load config from `config_path` (or `reconciler.toml` in the working directory),
/// apply environment overrides, then validate.
pub fn load_config_from<F>(config_path: Option<&Path>, lookup: F) -> Result<ReconcilerConfig, String>
where
    F: Fn(&str) -> Option<String>,
{
    let config = read_config(config_path, lookup)?;

    validate(&config).map_err(|errors| {
        format!(
            "Config validation failed:\n{}",
            errors
                .iter()
                .map(|e| format!("  - {}", e))
                .collect::<Vec<_>>()
                .join("\n")
        )
    })?;

    Ok(config)
}

/// Read config and apply environment overrides without validating.
///
/// A missing default file is not an error: everything may come from the environment.
/// A missing explicit `--config` path is.
pub fn read_config<F>(config_path: Option<&Path>, lookup: F) -> Result<ReconcilerConfig, String>
where
    F: Fn(&str) -> Option<String>,
{
    let (path, explicit) = match config_path {
        Some(p) => (p.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };

    let mut config = if path.exists() {
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?
    } else if explicit {
        return Err(format!("Config file not found: {}", path.display()));
    } else {
        ReconcilerConfig::default()
    };

    apply_env_overrides(&mut config, lookup);
    Ok(config)
}

/// Human-readable summary with secrets redacted.
pub fn describe(config: &ReconcilerConfig) -> Vec<String> {
    let redact = |value: &Option<String>| match value {
        Some(v) if !v.trim().is_empty() => "<set>",
        _ => "<unset>",
    };

    vec![
        format!(
            "[config] GitHub: owner={}, api={}, token={}, timeout={}s",
            config.github.owner,
            config.github.api_url,
            redact(&config.github.token),
            config.github.request_timeout_secs
        ),
        format!(
            "[config] Store: {}/{} (page size {})",
            config.store.root.display(),
            config.store.container,
            config.store.page_size
        ),
        format!(
            "[config] Events: endpoint={}, key={}, data_version={}",
            config.events.endpoint,
            redact(&config.events.key),
            config.events.data_version
        ),
        format!(
            "[config] Schedule: every {} minute(s)",
            config.schedule.interval_minutes
        ),
    ]
}
