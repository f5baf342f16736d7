//! Batch scheduling: bounded-concurrency dispatch of item pipelines.

use crate::matcher::best_match;
use crate::merge::merge;
use crate::pipeline::aggregator::OutcomeAggregator;
use crate::pipeline::outcome::{FailureKind, FetchOutcome, QueryItem};
use crate::providers::ProviderClient;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

pub struct BatchSchedulerParams {
    pub providers: Vec<Arc<dyn ProviderClient>>,
    pub aggregator: Arc<OutcomeAggregator>,
    pub match_threshold: f64,
    pub max_workers: usize,
    pub batch_size: usize,
    /// Courtesy pause between batches, independent of the transport's own
    /// per-provider gating.
    pub batch_pause: Duration,
    /// How long in-flight items may keep running after cancellation before
    /// they are force-abandoned.
    pub cancellation_grace: Duration,
    pub cancellation: CancellationToken,
}

/// Partitions the item list into batches and runs each item's full pipeline
/// (all provider fetches, match, merge) concurrently under a worker cap.
///
/// Batches are strictly sequential: batch N+1 starts only after every
/// outcome of batch N is recorded. Items within a batch complete in
/// arbitrary order.
pub struct BatchScheduler {
    providers: Arc<Vec<Arc<dyn ProviderClient>>>,
    aggregator: Arc<OutcomeAggregator>,
    match_threshold: f64,
    max_workers: usize,
    batch_size: usize,
    batch_pause: Duration,
    cancellation_grace: Duration,
    cancellation: CancellationToken,
}

impl BatchScheduler {
    pub fn new(params: BatchSchedulerParams) -> Self {
        Self {
            providers: Arc::new(params.providers),
            aggregator: params.aggregator,
            match_threshold: params.match_threshold,
            max_workers: params.max_workers.max(1),
            batch_size: params.batch_size.max(1),
            batch_pause: params.batch_pause,
            cancellation_grace: params.cancellation_grace,
            cancellation: params.cancellation,
        }
    }

    /// Processes every item, recording exactly one outcome per item with the
    /// aggregator. Cancellation stops dispatch; undispatched items resolve
    /// `Failed{Cancelled}` without any provider calls.
    pub async fn run(&self, items: Vec<QueryItem>) {
        let total_items = items.len();
        let total_batches = total_items.div_ceil(self.batch_size);

        tracing::info!(
            items = total_items,
            batches = total_batches,
            batch_size = self.batch_size,
            workers = self.max_workers,
            "starting enrichment run"
        );

        let mut remaining = items;
        let mut batch_index = 0usize;

        while !remaining.is_empty() {
            let tail = remaining.split_off(self.batch_size.min(remaining.len()));
            let batch = std::mem::replace(&mut remaining, tail);
            batch_index += 1;

            if self.cancellation.is_cancelled() {
                for item in batch.into_iter().chain(remaining.drain(..)) {
                    self.aggregator.record(&item, &FetchOutcome::cancelled());
                }
                tracing::info!(batch = batch_index, "run cancelled before batch started");
                break;
            }

            tracing::info!(
                batch = batch_index,
                total_batches,
                items = batch.len(),
                "processing batch"
            );
            self.run_batch(batch).await;

            let processed = self.aggregator.snapshot().processed;
            tracing::info!(processed, total = total_items, "batch complete");

            if !remaining.is_empty() && !self.batch_pause.is_zero() {
                tokio::select! {
                    _ = sleep(self.batch_pause) => {}
                    _ = self.cancellation.cancelled() => {}
                }
            }
        }
    }

    async fn run_batch(&self, batch: Vec<QueryItem>) {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut join_set: JoinSet<(QueryItem, FetchOutcome)> = JoinSet::new();
        let mut in_flight: HashMap<task::Id, QueryItem> = HashMap::new();

        for item in batch {
            if self.cancellation.is_cancelled() {
                self.aggregator.record(&item, &FetchOutcome::cancelled());
                continue;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => {
                    permit.expect("item semaphore is never closed")
                }
                _ = self.cancellation.cancelled() => {
                    self.aggregator.record(&item, &FetchOutcome::cancelled());
                    continue;
                }
            };

            let providers = self.providers.clone();
            let threshold = self.match_threshold;
            let tracked = item.clone();
            let handle = join_set.spawn(async move {
                let outcome = process_item(&providers, threshold, &item).await;
                drop(permit);
                (item, outcome)
            });
            in_flight.insert(handle.id(), tracked);
        }

        self.drain(join_set, in_flight).await;
    }

    /// Awaits every spawned item, recording outcomes as they land. Once the
    /// cancellation token fires, in-flight items get `cancellation_grace` to
    /// finish before the rest are aborted and recorded as cancelled.
    async fn drain(
        &self,
        mut join_set: JoinSet<(QueryItem, FetchOutcome)>,
        mut in_flight: HashMap<task::Id, QueryItem>,
    ) {
        let mut grace_deadline: Option<Instant> = None;

        while !join_set.is_empty() {
            let joined = match grace_deadline {
                Some(deadline) => match timeout_at(deadline, join_set.join_next_with_id()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        tracing::warn!(
                            abandoned = join_set.len(),
                            "cancellation grace period elapsed; abandoning in-flight items"
                        );
                        join_set.abort_all();
                        grace_deadline = None;
                        continue;
                    }
                },
                None => tokio::select! {
                    joined = join_set.join_next_with_id() => joined,
                    _ = self.cancellation.cancelled() => {
                        grace_deadline = Some(Instant::now() + self.cancellation_grace);
                        continue;
                    }
                },
            };

            match joined {
                Some(Ok((id, (item, outcome)))) => {
                    in_flight.remove(&id);
                    self.aggregator.record(&item, &outcome);
                }
                Some(Err(join_err)) => {
                    let Some(item) = in_flight.remove(&join_err.id()) else {
                        tracing::error!(error = %join_err, "joined an untracked item task");
                        continue;
                    };
                    if join_err.is_cancelled() {
                        self.aggregator.record(&item, &FetchOutcome::cancelled());
                    } else {
                        self.aggregator.record(
                            &item,
                            &FetchOutcome::Failed {
                                kind: FailureKind::Internal,
                                message: format!("item task panicked: {join_err}"),
                            },
                        );
                    }
                }
                None => break,
            }
        }
    }
}

/// One item's pipeline: fetch from every configured provider concurrently,
/// select each provider's best candidate, then merge.
///
/// A provider that failed (after the transport's retries) contributes zero
/// candidates; the item fails only when every provider failed.
async fn process_item(
    providers: &[Arc<dyn ProviderClient>],
    threshold: f64,
    item: &QueryItem,
) -> FetchOutcome {
    let lookups = providers.iter().map(|provider| {
        let id = provider.id();
        async move { (id, provider.lookup(item.title()).await) }
    });
    let results = join_all(lookups).await;

    let mut scored = Vec::new();
    let mut errors = Vec::new();
    let mut responding = 0usize;

    for (id, result) in results {
        match result {
            Ok(candidates) => {
                responding += 1;
                tracing::debug!(
                    provider = %id,
                    row = item.row_index(),
                    candidates = candidates.len(),
                    "provider lookup completed"
                );
                if let Some(best) = best_match(item.title(), candidates, threshold) {
                    scored.push(best);
                }
            }
            Err(err) => {
                tracing::warn!(
                    provider = %id,
                    row = item.row_index(),
                    error = %err,
                    "provider lookup failed; continuing with remaining providers"
                );
                errors.push(format!("{id}: {err:#}"));
            }
        }
    }

    if responding == 0 {
        return FetchOutcome::Failed {
            kind: FailureKind::AllProvidersFailed,
            message: errors.join("; "),
        };
    }

    if scored.is_empty() {
        return FetchOutcome::NoMatch;
    }

    FetchOutcome::Matched(merge(item.existing(), &scored))
}
