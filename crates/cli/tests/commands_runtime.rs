use std::env;
use std::sync::{Mutex, OnceLock};

use closer_cli::commands::{doctor, migrate, preview, recalibrate, smoke, status};
use closer_core::domain::allocation::AllocationStrategy;
use closer_core::domain::campaign::{CampaignId, CampaignPatch};
use closer_core::engine::DecisionEngine;
use closer_db::JsonDirStateStore;
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn migrate_returns_success_with_in_memory_sqlite() {
    with_env(&[("CLOSER_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["message"], "applied pending migrations");
    });
}

#[test]
fn migrate_is_a_noop_for_schemaless_backends() {
    with_env(&[("CLOSER_STORAGE_BACKEND", "memory")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert!(payload["message"].as_str().unwrap_or_default().contains("no schema"));
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("CLOSER_DATABASE_URL", "postgres://localhost/closer")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn status_reports_defaults_on_first_run() {
    with_env(&[("CLOSER_STORAGE_BACKEND", "memory")], || {
        let result = status::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "status");
        assert_eq!(payload["data"]["missing"].as_array().map(Vec::len), Some(6));
        assert_eq!(payload["data"]["engine"]["guardrails"]["frozen"], false);
        assert!(payload["data"]["engine"]["bandit"]["total_arms"].as_u64().unwrap_or_default() > 0);
    });
}

#[test]
fn preview_without_campaigns_is_a_bad_request() {
    with_env(&[("CLOSER_STORAGE_BACKEND", "memory")], || {
        let result = preview::run(AllocationStrategy::Balanced);
        assert_eq!(result.exit_code, 7);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "bad_request");
        let message = payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("no active campaigns"));
        assert!(message.ends_with("[cli.preview]"));
    });
}

#[test]
fn preview_scores_persisted_campaigns_without_committing() {
    let dir = TempDir::new().expect("tempdir");
    seed_campaigns(&dir);
    let data_dir = dir.path().display().to_string();

    with_env(&[("CLOSER_STORAGE_BACKEND", "json_dir"), ("CLOSER_STORAGE_DATA_DIR", data_dir.as_str())], || {
        let result = preview::run(AllocationStrategy::Growth);
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        let allocations = payload["data"]["allocations"].as_array().cloned().unwrap_or_default();
        assert_eq!(allocations.len(), 2);
        let total_to: f64 = allocations.iter().filter_map(|line| line["to"].as_f64()).sum();
        assert!((total_to - 300.0).abs() < 1e-6);

        let status = parse_payload(&status::run().output);
        assert_eq!(status["data"]["engine"]["pending_decisions"], 0);
        assert_eq!(status["data"]["engine"]["allocator"]["total_budget"], 300.0);
    });
}

#[test]
fn recalibrate_persists_priors_with_explicit_strength() {
    let dir = TempDir::new().expect("tempdir");
    let data_dir = dir.path().display().to_string();

    with_env(&[("CLOSER_STORAGE_BACKEND", "json_dir"), ("CLOSER_STORAGE_DATA_DIR", data_dir.as_str())], || {
        let result = recalibrate::run(Some(12.0));
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["data"]["base_strength"], 12.0);
        assert_eq!(payload["data"]["persisted"], true);

        let status = parse_payload(&status::run().output);
        let restored = status["data"]["restored"].as_array().cloned().unwrap_or_default();
        assert!(restored.iter().any(|kind| kind == "arms"));
    });
}

#[test]
fn doctor_passes_for_fresh_json_dir() {
    let dir = TempDir::new().expect("tempdir");
    let data_dir = dir.path().display().to_string();

    with_env(&[("CLOSER_STORAGE_BACKEND", "json_dir"), ("CLOSER_STORAGE_DATA_DIR", data_dir.as_str())], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
        assert_eq!(payload["checks"].as_array().map(Vec::len), Some(3));
    });
}

#[test]
fn doctor_flags_tampered_documents() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("campaigns.json"), "{ not json").expect("write");
    let data_dir = dir.path().display().to_string();

    with_env(&[("CLOSER_STORAGE_BACKEND", "json_dir"), ("CLOSER_STORAGE_DATA_DIR", data_dir.as_str())], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("- [fail] document_integrity"));
    });
}

#[test]
fn smoke_returns_success_report_with_memory_backend() {
    with_env(&[("CLOSER_STORAGE_BACKEND", "memory")], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 0, "expected successful smoke report");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "pass");
        assert_eq!(payload["checks"].as_array().map(Vec::len), Some(4));
    });
}

#[test]
fn smoke_returns_failure_when_config_invalid() {
    with_env(&[("CLOSER_ENGINE_AUTOSAVE_SECS", "soon")], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 6, "expected smoke failure code");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "fail");
        assert_eq!(payload["checks"][1]["status"], "skipped");
    });
}

fn seed_campaigns(dir: &TempDir) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    runtime.block_on(async {
        let engine = DecisionEngine::default();
        engine.add_or_update_campaign(
            CampaignId::new("search"),
            CampaignPatch { budget: Some(100.0), roas: Some(3.0), ..CampaignPatch::default() },
        );
        engine.add_or_update_campaign(
            CampaignId::new("social"),
            CampaignPatch { budget: Some(200.0), roas: Some(1.0), ..CampaignPatch::default() },
        );
        let store = JsonDirStateStore::new(dir.path().to_path_buf());
        assert!(engine.flush(&store, false).await.is_clean());
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner());

    let keys = [
        "CLOSER_DATABASE_URL",
        "CLOSER_DATABASE_MAX_CONNECTIONS",
        "CLOSER_DATABASE_TIMEOUT_SECS",
        "CLOSER_STORAGE_BACKEND",
        "CLOSER_STORAGE_DATA_DIR",
        "CLOSER_ENGINE_AUTOSAVE_SECS",
        "CLOSER_ENGINE_APPROVALS_ENABLED",
        "CLOSER_ENGINE_RECALIBRATION_STRENGTH",
        "CLOSER_ENGINE_DECISION_HISTORY_LIMIT",
        "CLOSER_ENGINE_CREATED_ORDER_REWARD",
        "CLOSER_GUARDRAILS_MIN_CONVERSIONS",
        "CLOSER_GUARDRAILS_MAX_SPEND_WITHOUT_CONVERSION",
        "CLOSER_GUARDRAILS_WINDOW_HOURS",
        "CLOSER_ALLOCATION_INTERVAL_SECS",
        "CLOSER_ALLOCATION_STRATEGY",
        "CLOSER_SERVER_BIND_ADDRESS",
        "CLOSER_SERVER_HEALTH_CHECK_PORT",
        "CLOSER_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "CLOSER_LOGGING_LEVEL",
        "CLOSER_LOGGING_FORMAT",
        "CLOSER_LOG_LEVEL",
        "CLOSER_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
