use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use provision_reconciler::config::{self, ReconcilerConfig};
use provision_reconciler::events::HttpEventPublisher;
use provision_reconciler::github::GithubClient;
use provision_reconciler::lock;
use provision_reconciler::log::parse_log_level;
use provision_reconciler::orchestrator::{CycleSettings, Orchestrator};
use provision_reconciler::shutdown::{install_signal_handlers, spawn_shutdown_monitor};
use provision_reconciler::store::{self, FsRecordStore, RecordStore};
use provision_reconciler::types::RecordHandle;
use provision_reconciler::watch::{self, HaltReason, WatchParams};
use provision_reconciler::{log_debug, log_info, log_warn};

type LiveOrchestrator = Orchestrator<FsRecordStore, GithubClient, HttpEventPublisher>;

#[derive(Parser)]
#[command(
    name = "provision-reconciler",
    about = "Resolve pending provisioning operations against CI workflow runs"
)]
struct Cli {
    /// Path to config file (defaults to ./reconciler.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log verbosity level (error, warn, info, debug)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single reconciliation cycle (exits non-zero if the cycle aborts)
    Run,
    /// Run cycles on an interval until interrupted
    Watch {
        /// Minutes between cycles (overrides schedule.interval_minutes)
        #[arg(long)]
        interval_minutes: Option<u64>,
        /// Stop after this many cycles
        #[arg(long)]
        max_cycles: Option<u32>,
    },
    /// List pending operations grouped by repository
    Status,
    /// Validate configuration and print a redacted summary
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match parse_log_level(&cli.log_level) {
        Ok(level) => provision_reconciler::log::set_log_level(level),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Run => handle_run(config_path).await,
        Commands::Watch {
            interval_minutes,
            max_cycles,
        } => handle_watch(config_path, interval_minutes, max_cycles).await,
        Commands::Status => handle_status(config_path).await,
        Commands::Check => handle_check(config_path),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(config_path: Option<&Path>) -> Result<ReconcilerConfig, String> {
    config::load_config_from(config_path, |name| std::env::var(name).ok())
}

fn build_orchestrator(config: &ReconcilerConfig) -> Result<LiveOrchestrator, String> {
    let token = config
        .github
        .token
        .as_deref()
        .ok_or_else(|| "github.token is not set".to_string())?;

    let store = FsRecordStore::new(
        &config.store.root,
        &config.store.container,
        config.store.page_size,
    );
    let ci = GithubClient::new(
        &config.github.api_url,
        token,
        &config.github.user_agent,
        config.github.request_timeout(),
    )?;
    let publisher = HttpEventPublisher::new(
        &config.events.endpoint,
        config.events.key.as_deref(),
        config.events.request_timeout(),
    )?;

    Ok(Orchestrator::new(
        store,
        ci,
        publisher,
        CycleSettings {
            owner: config.github.owner.clone(),
            data_version: config.events.data_version.clone(),
        },
    ))
}

async fn handle_run(config_path: Option<&Path>) -> Result<(), String> {
    let config = load_config(config_path)?;
    let _lock = lock::try_acquire(&config.runtime.lock_dir)?;

    for line in config::describe(&config) {
        log_debug!("{}", line);
    }

    let orchestrator = build_orchestrator(&config)?;
    orchestrator.run_cycle().await?;
    Ok(())
}

async fn handle_watch(
    config_path: Option<&Path>,
    interval_minutes: Option<u64>,
    max_cycles: Option<u32>,
) -> Result<(), String> {
    install_signal_handlers()?;

    let mut config = load_config(config_path)?;
    if let Some(minutes) = interval_minutes {
        if minutes < 1 {
            return Err("--interval-minutes must be >= 1".to_string());
        }
        config.schedule.interval_minutes = minutes;
    }
    let _lock = lock::try_acquire(&config.runtime.lock_dir)?;

    log_info!("--- Provision Reconciler ---");
    for line in config::describe(&config) {
        log_info!("{}", line);
    }

    let orchestrator = build_orchestrator(&config)?;

    let cancel = CancellationToken::new();
    let monitor = spawn_shutdown_monitor(cancel.clone());

    let summary = watch::run_watch(
        &orchestrator,
        WatchParams {
            interval: config.schedule.interval(),
            max_cycles,
        },
        cancel.clone(),
    )
    .await;

    cancel.cancel();
    if let Err(e) = monitor.await {
        log_warn!("[watch] Shutdown monitor task failed: {}", e);
    }

    log_info!("--- Watch Summary ---");
    log_info!("Cycles run: {}", summary.cycles_run);
    if summary.cycles_aborted > 0 {
        log_info!("Cycles aborted: {}", summary.cycles_aborted);
    }
    log_info!("Operations resolved: {}", summary.operations_resolved);
    match summary.halt_reason {
        HaltReason::ShutdownRequested => log_info!("Halt reason: shutdown requested"),
        HaltReason::CycleCapReached => log_info!("Halt reason: cycle cap reached"),
    }

    Ok(())
}

async fn handle_status(config_path: Option<&Path>) -> Result<(), String> {
    let config = config::read_config(config_path, |name| std::env::var(name).ok())?;
    if config.store.container.trim().is_empty() {
        return Err("store.container must be set".to_string());
    }

    let store = FsRecordStore::new(
        &config.store.root,
        &config.store.container,
        config.store.page_size,
    );
    let handles = store::list_pending(&store).await?;
    let pending = store::group_by_repository(handles);

    if pending.is_empty() && pending.malformed.is_empty() {
        println!("No pending operations.");
        return Ok(());
    }

    println!(
        "{:<24} {:<24} {:<24} {}",
        "REPOSITORY", "OPERATION", "TENANT", "SUBSCRIPTION"
    );
    println!("{}", "-".repeat(96));

    for (repository, operations) in &pending.by_repository {
        for (operation_id, handle) in operations {
            let (tenant, subscription) = describe_record(&store, handle).await;
            println!(
                "{:<24} {:<24} {:<24} {}",
                truncate(repository, 24),
                truncate(operation_id, 24),
                truncate(&tenant, 24),
                subscription
            );
        }
    }

    println!(
        "\n{} operation(s) pending across {} repositories",
        pending.operation_count(),
        pending.by_repository.len()
    );
    if !pending.malformed.is_empty() {
        println!(
            "{} malformed key(s) ignored: {}",
            pending.malformed.len(),
            pending
                .malformed
                .iter()
                .map(RecordHandle::key)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(())
}

fn handle_check(config_path: Option<&Path>) -> Result<(), String> {
    let config = load_config(config_path)?;
    for line in config::describe(&config) {
        println!("{}", line);
    }
    println!("Configuration OK");
    Ok(())
}

// --- Display helpers ---

async fn describe_record<S: RecordStore>(store: &S, handle: &RecordHandle) -> (String, String) {
    match store::read_record(store, handle).await {
        Ok(record) => (record.tenant_id, record.subscription_id),
        Err(e) => ("<unreadable>".to_string(), e.to_string()),
    }
}

/// Truncate a cell for display, respecting UTF-8 character boundaries.
fn truncate(value: &str, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        return value.to_string();
    }
    let truncated: String = value.chars().take(max_len - 3).collect();
    format!("{}...", truncated)
}
