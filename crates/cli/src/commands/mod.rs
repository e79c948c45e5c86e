pub mod config;
pub mod doctor;
pub mod migrate;
pub mod preview;
pub mod recalibrate;
pub mod smoke;
pub mod status;

use closer_core::config::{AppConfig, LoadOptions};
use closer_core::engine::{DecisionEngine, EngineSettings, RestoreReport};
use closer_core::errors::{ApplicationError, InterfaceError};
use closer_db::Storage;
use serde::Serialize;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

#[derive(Debug, Serialize)]
struct CommandReport<'a, T: Serialize> {
    command: &'a str,
    status: &'static str,
    data: &'a T,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    /// Successful command whose output is a structured document.
    pub fn report<T: Serialize>(command: &str, data: &T) -> Self {
        let report = CommandReport { command, status: "ok", data };
        match serde_json::to_string_pretty(&report) {
            Ok(output) => Self { exit_code: 0, output },
            Err(error) => Self::failure(command, "serialization", error.to_string(), 1),
        }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Failure triple carried out of an engine session: class, message, exit code.
pub(crate) type SessionError = (&'static str, String, u8);

/// Maps an engine failure onto the user-facing error classes. The command
/// name doubles as the correlation id.
pub(crate) fn engine_failure(command: &str, error: impl Into<ApplicationError>) -> SessionError {
    let error: InterfaceError = error.into().into_interface(format!("cli.{command}"));
    let (error_class, exit_code) = match &error {
        InterfaceError::BadRequest { .. } => ("bad_request", 7),
        InterfaceError::Conflict { .. } => ("conflict", 8),
        InterfaceError::ServiceUnavailable { .. } => ("service_unavailable", 9),
        InterfaceError::Internal { .. } => ("internal", 10),
    };
    let message = format!("{error}. {} [{}]", error.user_message(), error.correlation_id());
    (error_class, message, exit_code)
}

/// An engine restored from the configured store for one command invocation.
pub(crate) struct EngineSession {
    pub engine: DecisionEngine,
    pub storage: Storage,
    pub restore: RestoreReport,
}

/// Loads config, opens storage, restores the engine, and hands it to `work`.
/// The pool is closed before returning regardless of the outcome of `work`.
pub(crate) fn with_engine<T>(
    work: impl FnOnce(&tokio::runtime::Runtime, &EngineSession) -> Result<T, SessionError>,
) -> Result<T, SessionError> {
    let config = AppConfig::load(LoadOptions::default())
        .map_err(|error| ("config_validation", format!("configuration issue: {error}"), 2u8))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            ("runtime_init", format!("failed to initialize async runtime: {error}"), 3u8)
        })?;

    let session = runtime.block_on(async {
        let storage = closer_db::open(&config)
            .await
            .map_err(|error| ("storage", error.to_string(), 4u8))?;
        let engine = DecisionEngine::new(EngineSettings::from_config(&config));
        let restore = engine.restore(storage.state.as_ref()).await;
        Ok::<EngineSession, SessionError>(EngineSession { engine, storage, restore })
    })?;

    let result = work(&runtime, &session);

    if let Some(pool) = session.storage.pool.as_ref() {
        runtime.block_on(pool.close());
    }
    result
}
