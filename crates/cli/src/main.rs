use std::process::ExitCode;

fn main() -> ExitCode {
    closer_cli::run()
}
