use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::state::AppState;

pub(crate) async fn run(state: AppState) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let period = Duration::from_secs(state.settings().assessment().expiry_sweep_interval_seconds);

    let handles = vec![tokio::spawn(expiry_sweep_loop(state.clone(), period, shutdown_rx))];
    tracing::info!(interval_seconds = period.as_secs(), "Expiry sweeper started");

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

/// Closes attempts whose deadline plus grace has passed, scoring their saved drafts.
pub(crate) async fn expiry_sweep_loop(
    state: AppState,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = state.orchestrator().expire_overdue().await {
                    tracing::error!(error = %err, "expire_overdue failed");
                }
            }
        }
    }
    tracing::info!("Expiry sweeper stopped");
}
