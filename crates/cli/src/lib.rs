pub mod commands;

use clap::{Parser, Subcommand};
use closer_core::domain::allocation::AllocationStrategy;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "closer",
    about = "Closer operator CLI",
    long_about = "Inspect and maintain the Closer decision engine: configuration, storage readiness, migrations, engine state, allocation previews, and prior recalibration.",
    after_help = "Examples:\n  closer doctor --json\n  closer status\n  closer preview --strategy growth\n  closer recalibrate --strength 20"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Run end-to-end readiness checks with per-check timing details")]
    Smoke,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, storage reachability, and persisted document integrity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the restored engine status snapshot")]
    Status,
    #[command(about = "Score active campaigns and print the plan without committing it")]
    Preview {
        #[arg(long, default_value = "balanced", help = "balanced | growth | defensive")]
        strategy: AllocationStrategy,
    },
    #[command(about = "Re-derive arm priors from observed performance and persist them")]
    Recalibrate {
        #[arg(long, help = "Pseudo-count strength; defaults to engine.recalibration_strength")]
        strength: Option<f64>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Smoke => commands::smoke::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Status => commands::status::run(),
        Command::Preview { strategy } => commands::preview::run(strategy),
        Command::Recalibrate { strength } => commands::recalibrate::run(strength),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
