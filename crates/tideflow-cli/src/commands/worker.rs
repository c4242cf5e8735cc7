//! `tideflow worker` — poll timers and the outbox until interrupted.

use tokio::sync::watch;
use tideflow_core::{worker, Engine};

pub async fn run(engine: Engine) -> Result<(), String> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(worker::run_worker(engine, shutdown_rx));

    println!("tideflow worker running, press Ctrl+C to stop");

    // Keep the process running until interrupted
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for Ctrl+C: {}", e))?;

    println!("\nShutting down...");
    shutdown_tx
        .send(true)
        .map_err(|e| format!("Failed to signal worker: {}", e))?;
    handle
        .await
        .map_err(|e| format!("Worker task failed: {}", e))
}
