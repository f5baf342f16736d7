use crate::pipeline::aggregator::OutcomeAggregator;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls
/// back to `info`. Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Spawns a background task that periodically logs throughput and the
/// aggregator's counters until the shutdown token fires.
pub fn spawn_metrics_reporter(
    aggregator: Arc<OutcomeAggregator>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_processed = aggregator.snapshot().processed;
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "bibfetch::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let stats = aggregator.snapshot();
                    let processed_delta = stats.processed.saturating_sub(last_processed);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        processed_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "bibfetch::metrics",
                        throughput = format!("{throughput:.2}"),
                        processed = stats.processed,
                        matched = stats.matched,
                        no_match = stats.no_match,
                        failed = stats.failed,
                        pending_writes = aggregator.pending_write_count(),
                        "run metrics snapshot"
                    );

                    last_processed = stats.processed;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
