use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use super::{Collector, RunState};

/// Fire a collection tick every `interval` until `shutdown` flips.
///
/// Ticks are spawned so a slow family never delays the timer; a family that
/// is still running when the next tick fires is skipped by the collector.
/// On shutdown, in-flight runs are aborted. Points already written stay.
pub async fn run(
    collector: Arc<Collector>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        repo = %collector.tracker().repo,
        "Collection scheduler started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let collector = collector.clone();
                in_flight.spawn(async move {
                    let reports = collector.run_tick(Utc::now()).await;
                    let failed: Vec<_> = reports
                        .iter()
                        .filter(|r| r.state == RunState::Failed)
                        .map(|r| r.family.as_str())
                        .collect();
                    if !failed.is_empty() {
                        tracing::warn!(?failed, "Tick finished with failed families");
                    }
                });
            }
            Some(joined) = in_flight.join_next() => {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Collection tick panicked");
                }
            }
            _ = shutdown.changed() => {
                tracing::info!(in_flight = in_flight.len(), "Collection scheduler shutting down");
                in_flight.abort_all();
                break;
            }
        }
    }
}
