//! Background tasks for the relay.
//!
//! Includes:
//! - Sweeping stale in-flight connect requests.

use crate::AppState;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Starts the in-flight sweep task.
///
/// Runs indefinitely. Every `interval` it drops dedup entries older than the
/// dedup window, so entries whose owner never finished cannot pile up.
pub async fn start_sweep_task(state: Arc<AppState>, interval: Duration) {
    if interval.is_zero() {
        tracing::warn!("in-flight sweep disabled (interval=0)");
        return;
    }

    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        window_ms = state.in_flight.window().as_millis() as u64,
        "starting in-flight sweep task"
    );

    loop {
        sleep(interval).await;

        let removed = state.in_flight.sweep();
        if removed > 0 {
            tracing::debug!(count = removed, "swept stale in-flight requests");
        }
    }
}
