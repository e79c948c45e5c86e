use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use closer_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let fields: [(&str, String, &[&str]); 23] = [
        ("database.url", config.database.url.clone(), &["CLOSER_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["CLOSER_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["CLOSER_DATABASE_TIMEOUT_SECS"],
        ),
        ("storage.backend", format!("{:?}", config.storage.backend), &["CLOSER_STORAGE_BACKEND"]),
        (
            "storage.data_dir",
            config.storage.data_dir.display().to_string(),
            &["CLOSER_STORAGE_DATA_DIR"],
        ),
        (
            "engine.autosave_secs",
            config.engine.autosave_secs.to_string(),
            &["CLOSER_ENGINE_AUTOSAVE_SECS"],
        ),
        (
            "engine.approvals_enabled",
            config.engine.approvals_enabled.to_string(),
            &["CLOSER_ENGINE_APPROVALS_ENABLED"],
        ),
        (
            "engine.recalibration_strength",
            config.engine.recalibration_strength.to_string(),
            &["CLOSER_ENGINE_RECALIBRATION_STRENGTH"],
        ),
        (
            "engine.decision_history_limit",
            config.engine.decision_history_limit.to_string(),
            &["CLOSER_ENGINE_DECISION_HISTORY_LIMIT"],
        ),
        (
            "engine.created_order_reward",
            config.engine.created_order_reward.to_string(),
            &["CLOSER_ENGINE_CREATED_ORDER_REWARD"],
        ),
        (
            "guardrails.min_conversions",
            config.guardrails.min_conversions.to_string(),
            &["CLOSER_GUARDRAILS_MIN_CONVERSIONS"],
        ),
        (
            "guardrails.max_spend_without_conversion",
            config.guardrails.max_spend_without_conversion.to_string(),
            &["CLOSER_GUARDRAILS_MAX_SPEND_WITHOUT_CONVERSION"],
        ),
        (
            "guardrails.window_hours",
            config.guardrails.window_hours.to_string(),
            &["CLOSER_GUARDRAILS_WINDOW_HOURS"],
        ),
        ("guardrails.event_log_limit", config.guardrails.event_log_limit.to_string(), &[]),
        ("anomaly.window_size", config.anomaly.window_size.to_string(), &[]),
        ("anomaly.retention", config.anomaly.retention.to_string(), &[]),
        (
            "allocation.interval_secs",
            config.allocation.interval_secs.to_string(),
            &["CLOSER_ALLOCATION_INTERVAL_SECS"],
        ),
        (
            "allocation.strategy",
            config.allocation.strategy.to_string(),
            &["CLOSER_ALLOCATION_STRATEGY"],
        ),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            &["CLOSER_SERVER_BIND_ADDRESS"],
        ),
        (
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            &["CLOSER_SERVER_HEALTH_CHECK_PORT"],
        ),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["CLOSER_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["CLOSER_LOGGING_LEVEL", "CLOSER_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["CLOSER_LOGGING_FORMAT", "CLOSER_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in fields {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("closer.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/closer.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

/// The first env key present wins, matching the loader's alias order.
fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
