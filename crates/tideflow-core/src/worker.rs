//! Background driver: fires due timers and drains the engine outbox.

use tokio::sync::watch;

use crate::engine::{Engine, EngineMessage};
use crate::error::EngineError;
use crate::manager;
use crate::timers::fire_due_timers;

/// Handle every queued message, including ones queued while handling.
pub async fn process_outbox(engine: &Engine) -> usize {
    let mut handled = 0;
    while let Some(message) = engine.next_message().await {
        handle_message(engine, message).await;
        handled += 1;
    }
    handled
}

async fn handle_message(engine: &Engine, message: EngineMessage) {
    match message {
        EngineMessage::RunProcess {
            process_id,
            actor_data,
            input,
        } => match manager::run_process(engine, &process_id, actor_data, input).await {
            Ok(Some(outcome)) => {
                tracing::debug!(process_id = %process_id, status = %outcome.status, "child run")
            }
            Ok(None) => tracing::warn!(process_id = %process_id, "run for unknown process dropped"),
            Err(e) => tracing::warn!(process_id = %process_id, error = %e, "run failed"),
        },
        EngineMessage::ContinueProcess {
            process_id,
            result_data,
            expected_step_number,
        } => {
            match manager::continue_process(engine, &process_id, result_data, expected_step_number)
                .await
            {
                Ok(continued) => {
                    tracing::debug!(process_id = %process_id, continued, "parent continue")
                }
                Err(e) => tracing::warn!(process_id = %process_id, error = %e, "continue failed"),
            }
        }
    }
}

/// One poll: timers first, then whatever they queued.
pub async fn tick(engine: &Engine) -> Result<(usize, usize), EngineError> {
    let fired = fire_due_timers(engine).await?;
    let handled = process_outbox(engine).await;
    Ok((fired, handled))
}

/// Poll until `shutdown` turns true or its sender goes away.
pub async fn run_worker(engine: Engine, mut shutdown: watch::Receiver<bool>) {
    let interval = engine.config.timer_poll_interval;
    tracing::info!(interval_ms = interval.as_millis() as u64, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        if let Err(e) = tick(&engine).await {
            tracing::warn!(error = %e, "worker tick failed");
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    tracing::info!("worker stopped");
}
