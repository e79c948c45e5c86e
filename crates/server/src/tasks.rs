//! Background tickers owned by the server process.

use std::sync::Arc;
use std::time::Duration;

use closer_core::domain::allocation::AllocationStrategy;
use closer_core::engine::DecisionEngine;
use closer_core::errors::{ApplicationError, DomainError};
use closer_core::guardrails::GuardrailSnapshot;
use closer_core::persistence::StateStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Flushes dirty documents every `period` until shutdown is signalled.
pub fn spawn_autosave(
    engine: Arc<DecisionEngine>,
    store: Arc<dyn StateStore>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = engine.flush(store.as_ref(), false).await;
                    if !report.is_clean() {
                        warn!(
                            event_name = "system.autosave.partial",
                            failed = report.failed.len(),
                            "autosave left documents dirty"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(event_name = "system.autosave.stopped", "autosave ticker stopped");
    })
}

/// Runs one allocation per `period`. A zero period disables the ticker.
pub fn spawn_allocation(
    engine: Arc<DecisionEngine>,
    strategy: AllocationStrategy,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if period.is_zero() {
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => run_allocation(&engine, strategy),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(event_name = "system.allocation.stopped", "allocation ticker stopped");
    }))
}

/// Re-evaluates the guardrail windows before allocating so stale spend ages
/// out of the freeze decision.
pub fn run_allocation(engine: &DecisionEngine, strategy: AllocationStrategy) {
    engine.check_guardrails(&GuardrailSnapshot::default());

    match engine.allocate(strategy) {
        Ok(decision) => info!(
            event_name = "system.allocation.completed",
            decision_id = %decision.id,
            strategy = %strategy,
            "scheduled allocation completed"
        ),
        Err(ApplicationError::Frozen { reason }) => info!(
            event_name = "system.allocation.skipped_frozen",
            reason = %reason,
            "scheduled allocation skipped while frozen"
        ),
        Err(ApplicationError::Domain(DomainError::NoActiveCampaigns)) => debug!(
            event_name = "system.allocation.skipped_empty",
            "no active campaigns to allocate"
        ),
        Err(error) => warn!(
            event_name = "system.allocation.failed",
            error = %error,
            "scheduled allocation failed"
        ),
    }
}
