use std::time::Instant;

use crate::commands::CommandResult;
use closer_core::config::{AppConfig, LoadOptions};
use closer_core::domain::arm::{ArmCategory, ArmId};
use closer_core::domain::context::DecisionContext;
use closer_core::domain::outcome::Outcome;
use closer_core::engine::{DecisionEngine, EngineSettings};
use closer_db::InMemoryStateStore;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

/// Read-only against the configured store: the decision cycle runs on a
/// scratch engine and persists into memory.
pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config = match timed_check(|| AppConfig::load(LoadOptions::default())) {
        Ok((elapsed_ms, config)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Pass,
                elapsed_ms,
                message: "configuration loaded and validated".to_string(),
            });
            config
        }
        Err((elapsed_ms, error)) => {
            checks.push(SmokeCheck {
                name: "config_validation",
                status: SmokeStatus::Fail,
                elapsed_ms,
                message: error.to_string(),
            });
            checks.push(skipped("storage_restore"));
            checks.push(skipped("decision_cycle"));
            checks.push(skipped("state_roundtrip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "storage_restore",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.push(skipped("decision_cycle"));
            checks.push(skipped("state_roundtrip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    };

    let storage_started = Instant::now();
    let storage_result = runtime.block_on(async {
        let storage = closer_db::open(&config).await.map_err(|error| error.to_string())?;
        let engine = DecisionEngine::new(EngineSettings::from_config(&config));
        let restore = engine.restore(storage.state.as_ref()).await;
        if let Some(pool) = storage.pool.as_ref() {
            pool.close().await;
        }
        if restore.failed.is_empty() {
            Ok(format!(
                "{:?} storage restored {} documents ({} missing)",
                storage.backend,
                restore.loaded.len(),
                restore.missing.len()
            ))
        } else {
            Err(format!("{} documents could not be restored", restore.failed.len()))
        }
    });
    checks.push(match storage_result {
        Ok(message) => SmokeCheck {
            name: "storage_restore",
            status: SmokeStatus::Pass,
            elapsed_ms: storage_started.elapsed().as_millis() as u64,
            message,
        },
        Err(message) => SmokeCheck {
            name: "storage_restore",
            status: SmokeStatus::Fail,
            elapsed_ms: storage_started.elapsed().as_millis() as u64,
            message,
        },
    });

    let scratch = DecisionEngine::new(EngineSettings::from_config(&config));
    let cycle_started = Instant::now();
    match run_decision_cycle(&scratch) {
        Ok(selected) => checks.push(SmokeCheck {
            name: "decision_cycle",
            status: SmokeStatus::Pass,
            elapsed_ms: cycle_started.elapsed().as_millis() as u64,
            message: format!("selected and rewarded {selected} arms"),
        }),
        Err(message) => {
            checks.push(SmokeCheck {
                name: "decision_cycle",
                status: SmokeStatus::Fail,
                elapsed_ms: cycle_started.elapsed().as_millis() as u64,
                message,
            });
            checks.push(skipped("state_roundtrip"));
            return finalize_report(checks, started.elapsed().as_millis() as u64);
        }
    }

    let roundtrip_started = Instant::now();
    let roundtrip = runtime.block_on(async {
        let store = InMemoryStateStore::default();
        let flushed = scratch.flush(&store, true).await;
        if !flushed.is_clean() {
            return Err(format!("{} documents failed to save", flushed.failed.len()));
        }
        let reloaded = DecisionEngine::new(EngineSettings::from_config(&config));
        let restore = reloaded.restore(&store).await;
        let (before, after) = (scratch.status().bandit, reloaded.status().bandit);
        if !restore.failed.is_empty()
            || before.total_arms != after.total_arms
            || before.total_plays != after.total_plays
        {
            return Err("restored bandit state differs from the flushed state".to_string());
        }
        Ok(flushed.saved.len())
    });
    checks.push(match roundtrip {
        Ok(saved) => SmokeCheck {
            name: "state_roundtrip",
            status: SmokeStatus::Pass,
            elapsed_ms: roundtrip_started.elapsed().as_millis() as u64,
            message: format!("{saved} documents saved and restored"),
        },
        Err(message) => SmokeCheck {
            name: "state_roundtrip",
            status: SmokeStatus::Fail,
            elapsed_ms: roundtrip_started.elapsed().as_millis() as u64,
            message,
        },
    });

    finalize_report(checks, started.elapsed().as_millis() as u64)
}

fn run_decision_cycle(engine: &DecisionEngine) -> Result<usize, String> {
    let context = DecisionContext::default();
    let mut arm_ids: Vec<ArmId> = Vec::new();
    for category in ArmCategory::ALL {
        let selection = engine.select(category, &context).map_err(|error| error.to_string())?;
        arm_ids.push(selection.arm.id);
    }

    let report = engine.record_outcome(&arm_ids, &Outcome::conversion(0.0));
    if !report.unknown_arms.is_empty() {
        return Err(format!("{} selected arms were not found", report.unknown_arms.len()));
    }
    Ok(report.arms_updated)
}

fn timed_check<T, E>(check: impl FnOnce() -> Result<T, E>) -> Result<(u64, T), (u64, E)> {
    let started = Instant::now();
    match check() {
        Ok(value) => Ok((started.elapsed().as_millis() as u64, value)),
        Err(error) => Err((started.elapsed().as_millis() as u64, error)),
    }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
