use closer_core::config::{AppConfig, LoadOptions};
use closer_core::engine::{DecisionEngine, EngineSettings};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.extend(check_storage(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(skipped("storage_connectivity", "configuration did not load"));
            checks.push(skipped("document_integrity", "configuration did not load"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Opens the configured store and restores every document into a scratch
/// engine. Missing documents pass; unreadable ones fail.
fn check_storage(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "storage_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                skipped("document_integrity", "storage could not be opened"),
            ];
        }
    };

    runtime.block_on(async {
        let storage = match closer_db::open(config).await {
            Ok(storage) => storage,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "storage_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to open {:?} storage: {error}", config.storage.backend),
                    },
                    skipped("document_integrity", "storage could not be opened"),
                ];
            }
        };

        let engine = DecisionEngine::new(EngineSettings::from_config(config));
        let restore = engine.restore(storage.state.as_ref()).await;
        if let Some(pool) = storage.pool.as_ref() {
            pool.close().await;
        }

        let integrity = if restore.failed.is_empty() {
            DoctorCheck {
                name: "document_integrity",
                status: CheckStatus::Pass,
                details: format!(
                    "{} documents restored, {} not yet written",
                    restore.loaded.len(),
                    restore.missing.len()
                ),
            }
        } else {
            let failures = restore
                .failed
                .iter()
                .map(|(kind, error)| format!("{}: {error}", kind.as_str()))
                .collect::<Vec<_>>()
                .join("; ");
            DoctorCheck {
                name: "document_integrity",
                status: CheckStatus::Fail,
                details: format!("unreadable documents ({failures})"),
            }
        };

        vec![
            DoctorCheck {
                name: "storage_connectivity",
                status: CheckStatus::Pass,
                details: format!("{:?} storage opened", storage.backend),
            },
            integrity,
        ]
    })
}

fn skipped(name: &'static str, because: &str) -> DoctorCheck {
    DoctorCheck { name, status: CheckStatus::Skipped, details: format!("skipped because {because}") }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
