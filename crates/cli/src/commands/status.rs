use closer_core::engine::EngineStatus;
use serde::Serialize;

use crate::commands::{with_engine, CommandResult};

#[derive(Debug, Serialize)]
struct StatusReport {
    backend: String,
    restored: Vec<&'static str>,
    missing: Vec<&'static str>,
    unreadable: Vec<&'static str>,
    engine: EngineStatus,
}

pub fn run() -> CommandResult {
    let result = with_engine(|_, session| {
        Ok(StatusReport {
            backend: format!("{:?}", session.storage.backend).to_ascii_lowercase(),
            restored: session.restore.loaded.iter().map(|kind| kind.as_str()).collect(),
            missing: session.restore.missing.iter().map(|kind| kind.as_str()).collect(),
            unreadable: session.restore.failed.iter().map(|(kind, _)| kind.as_str()).collect(),
            engine: session.engine.status(),
        })
    });

    match result {
        Ok(report) => CommandResult::report("status", &report),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("status", error_class, message, exit_code)
        }
    }
}
