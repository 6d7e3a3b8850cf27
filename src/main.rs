use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dockerized::cli::Cli;
use dockerized::commands;
use dockerized::DockerizedError;

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli: Cli = Cli::parse();
    init_logging(cli.verbose);

    match commands::run::execute(cli).await {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            // A failing command is reported by the run itself, in verbose mode only.
            if !matches!(e, DockerizedError::CommandFailed { .. }) {
                eprintln!("Error: {}", e);
            }
            ExitCode::from(e.exit_code().clamp(0, 255) as u8)
        }
    }
}
