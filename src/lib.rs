pub mod ai;
pub mod auth;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod http_client;
pub mod pipeline;
pub mod platform;
pub mod rate_limit;
pub mod retry;
pub mod session;

#[cfg(test)]
mod testing;

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

pub fn run() -> ExitCode {
    // Load .env file - current dir first, then the parent
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path("../.env");
    }

    // Logs go to stderr so stdout stays clean for tables.
    // Default: warn for most crates, info for ours. RUST_LOG=debug for per-request logs
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,favsort_lib=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cli::execute(cli)) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(code) => ExitCode::from(code.clamp(1, 255) as u8),
        Err(e) => {
            tracing::debug!(kind = e.kind(), "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
