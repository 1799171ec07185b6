use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::events::EventPublisher;
use crate::github::CiProvider;
use crate::orchestrator::Orchestrator;
use crate::store::RecordStore;
use crate::{log_info, log_warn};

/// Consecutive aborted cycles after which every further abort is escalated to a warning.
const ABORT_STREAK_WARN_THRESHOLD: u32 = 3;

/// Parameters for the watch loop.
#[derive(Debug, Clone)]
pub struct WatchParams {
    pub interval: Duration,
    /// Stop after this many cycles. `None` runs until shutdown.
    pub max_cycles: Option<u32>,
}

#[derive(Debug, PartialEq)]
pub enum HaltReason {
    ShutdownRequested,
    CycleCapReached,
}

/// Totals across every cycle the loop ran.
#[derive(Debug)]
pub struct WatchSummary {
    pub cycles_run: u32,
    pub cycles_aborted: u32,
    pub operations_resolved: usize,
    pub halt_reason: HaltReason,
}

/// Run cycles back to back, `interval` apart, until cancelled or capped.
///
/// A cycle-fatal error ends that cycle only; the loop keeps its schedule, as an
/// external scheduler would.
pub async fn run_watch<S, C, P>(
    orchestrator: &Orchestrator<S, C, P>,
    params: WatchParams,
    cancel: CancellationToken,
) -> WatchSummary
where
    S: RecordStore,
    C: CiProvider,
    P: EventPublisher,
{
    let mut cycles_run = 0u32;
    let mut cycles_aborted = 0u32;
    let mut abort_streak = 0u32;
    let mut operations_resolved = 0usize;

    log_info!(
        "[watch] Started (interval={}s{}).",
        params.interval.as_secs(),
        params
            .max_cycles
            .map(|m| format!(", max_cycles={}", m))
            .unwrap_or_default()
    );

    let halt_reason = loop {
        if cancel.is_cancelled() {
            break HaltReason::ShutdownRequested;
        }

        cycles_run += 1;
        log_info!("[watch] Cycle {} starting", cycles_run);
        match orchestrator.run_cycle().await {
            Ok(summary) => {
                operations_resolved += summary.resolved();
                abort_streak = 0;
            }
            Err(_) => {
                // run_cycle already logged the cause
                cycles_aborted += 1;
                abort_streak += 1;
                if abort_streak >= ABORT_STREAK_WARN_THRESHOLD {
                    log_warn!(
                        "[watch] {} consecutive cycles aborted; check CI and store connectivity",
                        abort_streak
                    );
                }
            }
        }

        if params.max_cycles.is_some_and(|max| cycles_run >= max) {
            break HaltReason::CycleCapReached;
        }

        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(params.interval) => false,
        };
        if cancelled {
            break HaltReason::ShutdownRequested;
        }
    };

    WatchSummary {
        cycles_run,
        cycles_aborted,
        operations_resolved,
        halt_reason,
    }
}
