use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::repositories::attempts;
use crate::services::grading;

const SWEEP_BATCH_SIZE: i64 = 200;

/// Background sweep enforcing attempt deadlines with no client traffic: any
/// in-progress attempt past its time limit is force-finalized.
pub(crate) async fn run(state: AppState) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper = tokio::spawn(sweep_loop(state.clone(), shutdown_rx));

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    if let Err(err) = sweeper.await {
        tracing::error!(error = %err, "Background task join failed");
    }

    Ok(())
}

async fn sweep_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let period = Duration::from_secs(state.settings().attempt().sweep_interval_seconds);
    let mut ticker = interval(period);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        if *shutdown.borrow() {
            break;
        }

        match sweep_once(&state).await {
            Ok(0) => {}
            Ok(count) => tracing::info!(count, "force-finalized overdue attempts"),
            Err(err) => tracing::error!(error = %err, "Attempt sweep failed"),
        }
    }
}

async fn sweep_once(state: &AppState) -> Result<usize, sqlx::Error> {
    let overdue =
        attempts::list_overdue(state.db(), primitive_now_utc(), SWEEP_BATCH_SIZE).await?;

    let mut finalized = 0;
    for attempt in &overdue {
        match grading::finalize_attempt(state.db(), attempt).await {
            Ok(_) => finalized += 1,
            Err(err) => {
                tracing::error!(attempt_id = %attempt.id, error = %err, "Failed to finalize overdue attempt");
            }
        }
    }

    Ok(finalized)
}
