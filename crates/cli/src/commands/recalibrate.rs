use closer_core::persistence::DocumentKind;
use serde::Serialize;

use crate::commands::{engine_failure, with_engine, CommandResult};

#[derive(Debug, Serialize)]
struct RecalibrationOutput {
    arms: usize,
    base_strength: f64,
    persisted: bool,
}

pub fn run(strength: Option<f64>) -> CommandResult {
    let result = with_engine(|runtime, session| {
        let report = match strength {
            Some(strength) => session.engine.bandit().recalibrate_priors(strength),
            None => session.engine.recalibrate(),
        };

        let flush = runtime.block_on(session.engine.flush(session.storage.state.as_ref(), false));
        if let Some((_, error)) = flush.failed.iter().find(|(kind, _)| *kind == DocumentKind::Arms) {
            return Err(engine_failure("recalibrate", error.clone()));
        }

        Ok(RecalibrationOutput {
            arms: report.arms,
            base_strength: report.base_strength,
            persisted: flush.saved.contains(&DocumentKind::Arms),
        })
    });

    match result {
        Ok(output) => CommandResult::report("recalibrate", &output),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("recalibrate", error_class, message, exit_code)
        }
    }
}
