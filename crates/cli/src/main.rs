mod cli;
mod commands;
mod report;

use std::process::ExitCode;

use clap::Parser;
use tracing::error;

use crate::cli::CliArgs;
use crate::commands::Status;

/// Configuration or connection problem.
const EXIT_SETUP_ERROR: u8 = 2;
/// The run finished but some variables were skipped or failed.
const EXIT_PARTIAL: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // .env must be loaded before clap reads env fallbacks.
    flowcast_core::config::load_dotenv();
    let args = CliArgs::parse();

    match commands::run(args).await {
        Ok(Status::Clean) => ExitCode::SUCCESS,
        Ok(Status::Partial) => ExitCode::from(EXIT_PARTIAL),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_SETUP_ERROR)
        }
    }
}
