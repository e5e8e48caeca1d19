#![doc = include_str!("../README.md")]

use clap::Parser;
use notes_server::server::{config::CliArgs, lifecycle::Lifecycle, telemetry::init_telemetry};
use std::process::ExitCode;
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    let providers = match init_telemetry() {
        Ok(providers) => providers,
        Err(err) => {
            eprintln!("Failed to initialise telemetry: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let code = match Lifecycle::new().run(args, shutdown_signal()).await {
        Ok(()) => {
            tracing::info!("Service shut down successfully");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(stage = %err.stage(), "Startup failed at {} stage: {err}", err.stage());
            ExitCode::FAILURE
        }
    };

    providers.shutdown();
    code
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
