use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::allocation::AllocationStrategy;

/// Longest guardrail window accepted, one year.
pub const MAX_GUARDRAIL_WINDOW_HOURS: u64 = 24 * 365;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub guardrails: GuardrailConfig,
    pub anomaly: AnomalyConfig,
    pub allocation: AllocationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineConfig {
    pub autosave_secs: u64,
    pub approvals_enabled: bool,
    pub recalibration_strength: f64,
    pub decision_history_limit: usize,
    pub created_order_reward: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GuardrailConfig {
    pub min_conversions: u64,
    pub max_spend_without_conversion: f64,
    pub window_hours: u64,
    pub event_log_limit: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnomalyConfig {
    pub window_size: usize,
    pub retention: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AllocationConfig {
    /// Zero disables the periodic allocation run.
    pub interval_secs: u64,
    pub strategy: AllocationStrategy,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Sqlite,
    JsonDir,
    Memory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub storage_backend: Option<StorageBackend>,
    pub data_dir: Option<PathBuf>,
    pub approvals_enabled: Option<bool>,
    pub allocation_strategy: Option<AllocationStrategy>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://closer.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            storage: StorageConfig { backend: StorageBackend::Sqlite, data_dir: PathBuf::from("data") },
            engine: EngineConfig {
                autosave_secs: 60,
                approvals_enabled: false,
                recalibration_strength: 30.0,
                decision_history_limit: 500,
                created_order_reward: 0.3,
            },
            guardrails: GuardrailConfig {
                min_conversions: 1,
                max_spend_without_conversion: 150.0,
                window_hours: 24,
                event_log_limit: 500,
            },
            anomaly: AnomalyConfig { window_size: 500, retention: 2000 },
            allocation: AllocationConfig { interval_secs: 0, strategy: AllocationStrategy::Balanced },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "json_dir" | "json-dir" | "json" => Ok(Self::JsonDir),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Validation(format!(
                "unsupported storage backend `{other}` (expected sqlite|json_dir|memory)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("closer.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(storage) = patch.storage {
            if let Some(backend) = storage.backend {
                self.storage.backend = backend;
            }
            if let Some(data_dir) = storage.data_dir {
                self.storage.data_dir = data_dir;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(autosave_secs) = engine.autosave_secs {
                self.engine.autosave_secs = autosave_secs;
            }
            if let Some(approvals_enabled) = engine.approvals_enabled {
                self.engine.approvals_enabled = approvals_enabled;
            }
            if let Some(strength) = engine.recalibration_strength {
                self.engine.recalibration_strength = strength;
            }
            if let Some(limit) = engine.decision_history_limit {
                self.engine.decision_history_limit = limit;
            }
            if let Some(reward) = engine.created_order_reward {
                self.engine.created_order_reward = reward;
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(min_conversions) = guardrails.min_conversions {
                self.guardrails.min_conversions = min_conversions;
            }
            if let Some(max_spend) = guardrails.max_spend_without_conversion {
                self.guardrails.max_spend_without_conversion = max_spend;
            }
            if let Some(window_hours) = guardrails.window_hours {
                self.guardrails.window_hours = window_hours;
            }
            if let Some(event_log_limit) = guardrails.event_log_limit {
                self.guardrails.event_log_limit = event_log_limit;
            }
        }

        if let Some(anomaly) = patch.anomaly {
            if let Some(window_size) = anomaly.window_size {
                self.anomaly.window_size = window_size;
            }
            if let Some(retention) = anomaly.retention {
                self.anomaly.retention = retention;
            }
        }

        if let Some(allocation) = patch.allocation {
            if let Some(interval_secs) = allocation.interval_secs {
                self.allocation.interval_secs = interval_secs;
            }
            if let Some(strategy) = allocation.strategy {
                self.allocation.strategy = strategy;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CLOSER_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CLOSER_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_env("CLOSER_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CLOSER_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("CLOSER_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CLOSER_STORAGE_BACKEND") {
            self.storage.backend = value.parse()?;
        }
        if let Some(value) = read_env("CLOSER_STORAGE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("CLOSER_ENGINE_AUTOSAVE_SECS") {
            self.engine.autosave_secs = parse_env("CLOSER_ENGINE_AUTOSAVE_SECS", &value)?;
        }
        if let Some(value) = read_env("CLOSER_ENGINE_APPROVALS_ENABLED") {
            self.engine.approvals_enabled = parse_env("CLOSER_ENGINE_APPROVALS_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CLOSER_ENGINE_RECALIBRATION_STRENGTH") {
            self.engine.recalibration_strength =
                parse_env("CLOSER_ENGINE_RECALIBRATION_STRENGTH", &value)?;
        }
        if let Some(value) = read_env("CLOSER_ENGINE_DECISION_HISTORY_LIMIT") {
            self.engine.decision_history_limit =
                parse_env("CLOSER_ENGINE_DECISION_HISTORY_LIMIT", &value)?;
        }
        if let Some(value) = read_env("CLOSER_ENGINE_CREATED_ORDER_REWARD") {
            self.engine.created_order_reward =
                parse_env("CLOSER_ENGINE_CREATED_ORDER_REWARD", &value)?;
        }

        if let Some(value) = read_env("CLOSER_GUARDRAILS_MIN_CONVERSIONS") {
            self.guardrails.min_conversions =
                parse_env("CLOSER_GUARDRAILS_MIN_CONVERSIONS", &value)?;
        }
        if let Some(value) = read_env("CLOSER_GUARDRAILS_MAX_SPEND_WITHOUT_CONVERSION") {
            self.guardrails.max_spend_without_conversion =
                parse_env("CLOSER_GUARDRAILS_MAX_SPEND_WITHOUT_CONVERSION", &value)?;
        }
        if let Some(value) = read_env("CLOSER_GUARDRAILS_WINDOW_HOURS") {
            self.guardrails.window_hours = parse_env("CLOSER_GUARDRAILS_WINDOW_HOURS", &value)?;
        }

        if let Some(value) = read_env("CLOSER_ALLOCATION_INTERVAL_SECS") {
            self.allocation.interval_secs = parse_env("CLOSER_ALLOCATION_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("CLOSER_ALLOCATION_STRATEGY") {
            self.allocation.strategy = value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                key: "CLOSER_ALLOCATION_STRATEGY".to_string(),
                value: value.clone(),
            })?;
        }

        if let Some(value) = read_env("CLOSER_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CLOSER_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_env("CLOSER_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("CLOSER_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("CLOSER_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("CLOSER_LOGGING_LEVEL").or_else(|| read_env("CLOSER_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CLOSER_LOGGING_FORMAT").or_else(|| read_env("CLOSER_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(backend) = overrides.storage_backend {
            self.storage.backend = backend;
        }
        if let Some(data_dir) = overrides.data_dir {
            self.storage.data_dir = data_dir;
        }
        if let Some(approvals_enabled) = overrides.approvals_enabled {
            self.engine.approvals_enabled = approvals_enabled;
        }
        if let Some(strategy) = overrides.allocation_strategy {
            self.allocation.strategy = strategy;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_storage(&self.storage)?;
        validate_engine(&self.engine)?;
        validate_guardrails(&self.guardrails)?;
        validate_anomaly(&self.anomaly)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("closer.toml"), PathBuf::from("config/closer.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    if storage.backend == StorageBackend::JsonDir && storage.data_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "storage.data_dir is required for the json_dir backend".to_string(),
        ));
    }
    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.autosave_secs == 0 {
        return Err(ConfigError::Validation(
            "engine.autosave_secs must be greater than zero".to_string(),
        ));
    }
    if !(engine.recalibration_strength.is_finite() && engine.recalibration_strength > 0.0) {
        return Err(ConfigError::Validation(
            "engine.recalibration_strength must be a positive number".to_string(),
        ));
    }
    if engine.decision_history_limit == 0 {
        return Err(ConfigError::Validation(
            "engine.decision_history_limit must be greater than zero".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&engine.created_order_reward) {
        return Err(ConfigError::Validation(
            "engine.created_order_reward must be in range 0.0..=1.0".to_string(),
        ));
    }
    Ok(())
}

fn validate_guardrails(guardrails: &GuardrailConfig) -> Result<(), ConfigError> {
    let max_spend = guardrails.max_spend_without_conversion;
    if !(max_spend.is_finite() && max_spend > 0.0) {
        return Err(ConfigError::Validation(
            "guardrails.max_spend_without_conversion must be a positive number".to_string(),
        ));
    }
    if guardrails.window_hours == 0 {
        return Err(ConfigError::Validation(
            "guardrails.window_hours must be greater than zero".to_string(),
        ));
    }
    if guardrails.window_hours > MAX_GUARDRAIL_WINDOW_HOURS {
        return Err(ConfigError::Validation(format!(
            "guardrails.window_hours must be at most {MAX_GUARDRAIL_WINDOW_HOURS}"
        )));
    }
    Ok(())
}

fn validate_anomaly(anomaly: &AnomalyConfig) -> Result<(), ConfigError> {
    if anomaly.window_size < 2 {
        return Err(ConfigError::Validation(
            "anomaly.window_size must be at least 2".to_string(),
        ));
    }
    if anomaly.retention == 0 {
        return Err(ConfigError::Validation(
            "anomaly.retention must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    storage: Option<StoragePatch>,
    engine: Option<EnginePatch>,
    guardrails: Option<GuardrailPatch>,
    anomaly: Option<AnomalyPatch>,
    allocation: Option<AllocationPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    backend: Option<StorageBackend>,
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    autosave_secs: Option<u64>,
    approvals_enabled: Option<bool>,
    recalibration_strength: Option<f64>,
    decision_history_limit: Option<usize>,
    created_order_reward: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailPatch {
    min_conversions: Option<u64>,
    max_spend_without_conversion: Option<f64>,
    window_hours: Option<u64>,
    event_log_limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct AnomalyPatch {
    window_size: Option<usize>,
    retention: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct AllocationPatch {
    interval_secs: Option<u64>,
    strategy: Option<AllocationStrategy>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
