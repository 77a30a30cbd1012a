//! Dead-air monitoring
//!
//! A background task that polls the engine's silence probe. The engine
//! decides whether the line is actually quiet; the monitor only supplies
//! the clock ticks and a shutdown handle.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::scheduler::TurnEngine;

pub struct DeadAirMonitor;

impl DeadAirMonitor {
    /// Start polling. Returns the shutdown handle; send `true` (or drop it)
    /// to stop. The task also stops on its own once the call ends.
    pub fn start(engine: Arc<TurnEngine>, poll_interval: Duration) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if engine.is_call_ended() {
                            break;
                        }
                        if let Err(err) = engine.check_dead_air().await {
                            tracing::warn!(error = %err, "dead-air check failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("dead-air monitor stopped");
        });

        shutdown_tx
    }
}
