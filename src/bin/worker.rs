//! Queue-drain worker binary
//!
//! Processes `RunExecution` jobs until the queue is empty, then exits.
//! Exit codes: 0 normal, 64 configuration error, 70 internal failure,
//! 75 transient queue failure (safe to re-run).

use crucible::{Application, Error};
use std::process::ExitCode;
use tracing::{error, info};

const EXIT_CONFIG: u8 = 64;
const EXIT_INTERNAL: u8 = 70;
const EXIT_TRANSIENT: u8 = 75;

fn exit_code_for(err: &Error) -> u8 {
    match err {
        Error::Config(_) => EXIT_CONFIG,
        Error::Database(_) | Error::Transport { .. } | Error::Timeout { .. } => EXIT_TRANSIENT,
        _ => EXIT_INTERNAL,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let app = match Application::new().await {
        Ok(app) => app,
        Err(err) => {
            error!(error = %err, "failed to start worker");
            return ExitCode::from(exit_code_for(&err));
        }
    };

    match app.drain().await {
        Ok(stats) => {
            info!(
                processed = stats.processed,
                failed = stats.failed,
                "queue drained"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "drain failed");
            ExitCode::from(exit_code_for(&err))
        }
    }
}
