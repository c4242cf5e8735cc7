//! Firing due timers.
//!
//! A timer is claimed before it is handled, so it is consumed at most once
//! even with several workers polling. A handler that loses a lock race
//! releases its claim and the timer is picked up again on the next poll.

use chrono::Utc;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::models::{ActivityStatus, ProcessStatus, Timer, TimerResource};
use crate::process::Process;

/// Claim and handle every timer due now. Returns how many were consumed.
pub async fn fire_due_timers(engine: &Engine) -> Result<usize, EngineError> {
    let due = engine.timer_store.list_due(Utc::now()).await?;
    let mut fired = 0;
    for timer in due {
        if !engine.timer_store.claim(&timer.id).await? {
            continue;
        }
        match handle_timer(engine, &timer).await {
            Ok(()) => fired += 1,
            Err(e) if e.is_contention() => {
                tracing::warn!(timer_id = %timer.id, error = %e, "timer handler lost a race, releasing");
                engine.timer_store.release(&timer.id).await?;
            }
            Err(e) => {
                tracing::warn!(timer_id = %timer.id, error = %e, "timer handler failed");
                fired += 1;
            }
        }
    }
    if fired > 0 {
        tracing::debug!(fired, "timers fired");
    }
    Ok(fired)
}

pub async fn handle_timer(engine: &Engine, timer: &Timer) -> Result<(), EngineError> {
    match timer.resource_type {
        TimerResource::Process => handle_process_timer(engine, timer).await,
        TimerResource::ActivityManager => handle_activity_manager_timer(engine, timer).await,
    }
}

async fn handle_process_timer(engine: &Engine, timer: &Timer) -> Result<(), EngineError> {
    let Some(mut process) = Process::fetch(engine, &timer.resource_id).await? else {
        tracing::warn!(process_id = %timer.resource_id, "timer for unknown process");
        return Ok(());
    };
    if !timer.is_abort() {
        return process.timeout(engine, timer).await;
    }
    match process.status() {
        Some(status) if !status.is_terminal() => process.abort(engine).await,
        _ => Ok(()),
    }
}

/// Expire a still-open activity manager and the process waiting on it.
async fn handle_activity_manager_timer(engine: &Engine, timer: &Timer) -> Result<(), EngineError> {
    let Some(am) = engine.activity_manager_store.get(&timer.resource_id).await? else {
        return Ok(());
    };
    let expired = engine
        .activity_manager_store
        .transition(&am.id, ActivityStatus::Started, ActivityStatus::Expired)
        .await?;
    if !expired {
        return Ok(());
    }
    tracing::info!(activity_manager_id = %am.id, process_id = %am.process_id, "activity manager expired");

    let Some(mut process) = Process::fetch(engine, &am.process_id).await? else {
        return Ok(());
    };
    let waiting_on_it = process.status() == Some(ProcessStatus::Waiting)
        && process.current_state_id() == Some(am.process_state_id.as_str());
    if waiting_on_it {
        process.expire_process(engine).await?;
    }
    Ok(())
}
