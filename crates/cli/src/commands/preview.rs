use closer_core::domain::allocation::AllocationStrategy;

use crate::commands::{engine_failure, with_engine, CommandResult};

/// Preview never records a decision, so nothing is flushed back to storage.
pub fn run(strategy: AllocationStrategy) -> CommandResult {
    let result = with_engine(|_, session| {
        session.engine.preview_allocate(strategy).map_err(|error| engine_failure("preview", error))
    });

    match result {
        Ok(plan) => CommandResult::report("preview", &plan),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("preview", error_class, message, exit_code)
        }
    }
}
