//! End-to-end run orchestration: row store in, provider pipelines, cell
//! writes out. Also owns the Ctrl-C handling for interactive runs.

use crate::pipeline::aggregator::{OutcomeAggregator, RunStatistics};
use crate::pipeline::outcome::QueryItem;
use crate::pipeline::scheduler::{BatchScheduler, BatchSchedulerParams};
use crate::providers::google_books::GoogleBooksClient;
use crate::providers::open_library::OpenLibraryClient;
use crate::providers::{HttpTransport, ProviderClient, TransportOptions};
use crate::runtime::config::{EnrichmentConfig, FieldMapping};
use crate::runtime::telemetry::spawn_metrics_reporter;
use crate::store::{RowStore, SheetRow};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Coordinates one enrichment run over a row store.
pub struct Runner {
    config: EnrichmentConfig,
    store: Arc<dyn RowStore>,
    providers: Vec<Arc<dyn ProviderClient>>,
    transport: Option<Arc<HttpTransport>>,
    shutdown: CancellationToken,
}

impl Runner {
    /// Creates a runner wired to the real provider clients.
    pub fn new(config: EnrichmentConfig, store: Arc<dyn RowStore>) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let transport = Arc::new(HttpTransport::new(
            TransportOptions {
                request_timeout: config.request_timeout(),
                retry_attempts: config.retry_attempts(),
                backoff_base: config.backoff_factor(),
                rate_limit_delay: config.rate_limit_delay(),
                ..TransportOptions::default()
            },
            shutdown.clone(),
        )?);

        let providers: Vec<Arc<dyn ProviderClient>> = vec![
            Arc::new(GoogleBooksClient::new(transport.clone())),
            Arc::new(OpenLibraryClient::new(transport.clone())),
        ];

        Ok(Self {
            config,
            store,
            providers,
            transport: Some(transport),
            shutdown,
        })
    }

    /// Creates a runner with caller-supplied provider clients. No
    /// connectivity probe is issued since the transport (if any) is the
    /// caller's concern.
    pub fn with_providers(
        config: EnrichmentConfig,
        store: Arc<dyn RowStore>,
        providers: Vec<Arc<dyn ProviderClient>>,
    ) -> Self {
        Self {
            config,
            store,
            providers,
            transport: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// integrate with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the full pipeline once and returns the final statistics.
    ///
    /// Fails fast (before touching any item) when the network is unreachable
    /// or the store cannot be read. Individual item failures never abort the
    /// run.
    pub async fn run(&self) -> Result<RunStatistics> {
        if let Some(transport) = &self.transport {
            transport
                .probe_connectivity()
                .await
                .context("connectivity probe failed; aborting run")?;
        }

        let rows = self
            .store
            .read_rows()
            .await
            .context("failed to read rows from the store")?;
        let items = build_items(&rows, self.config.field_mapping());

        tracing::info!(
            rows = rows.len(),
            items = items.len(),
            dry_run = self.config.dry_run(),
            "starting enrichment"
        );

        let aggregator = Arc::new(OutcomeAggregator::default());
        let reporter_token = self.shutdown.child_token();
        let reporter = spawn_metrics_reporter(
            aggregator.clone(),
            reporter_token.clone(),
            self.config.metrics_interval(),
        );

        let scheduler = BatchScheduler::new(BatchSchedulerParams {
            providers: self.providers.clone(),
            aggregator: aggregator.clone(),
            match_threshold: self.config.match_threshold(),
            max_workers: self.config.max_workers(),
            batch_size: self.config.batch_size(),
            batch_pause: self.config.batch_pause(),
            cancellation_grace: self.config.cancellation_grace(),
            cancellation: self.shutdown.clone(),
        });
        scheduler.run(items).await;

        reporter_token.cancel();
        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "metrics reporter task terminated unexpectedly");
        }

        self.apply_writes(&aggregator).await;

        let stats = aggregator.snapshot();
        tracing::info!(
            processed = stats.processed,
            matched = stats.matched,
            no_match = stats.no_match,
            failed = stats.failed,
            writes_applied = stats.writes_applied,
            writes_failed = stats.writes_failed,
            error_kinds = ?stats.error_kinds,
            "enrichment run complete"
        );

        Ok(stats)
    }

    /// Runs until completion or until a Ctrl-C (SIGINT) requests a graceful
    /// shutdown. On Ctrl-C the run is cancelled and awaited, so outcomes for
    /// already-dispatched items are still recorded.
    pub async fn run_until_ctrl_c(&self) -> Result<RunStatistics> {
        let run = self.run();
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => return result,
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; cancelling run");
                self.shutdown.cancel();
            }
        }

        run.await
    }

    /// Applies queued writes to the store, mapping internal fields back to
    /// sheet columns. A failed write is counted and logged; the rest of the
    /// writes still go through.
    async fn apply_writes(&self, aggregator: &OutcomeAggregator) {
        let writes = aggregator.take_pending_writes();
        if writes.is_empty() {
            return;
        }

        let mapping = self.config.field_mapping();

        if self.config.dry_run() {
            for write in &writes {
                tracing::info!(
                    row = write.row_index,
                    field = %write.field,
                    value = %write.value,
                    "dry run; skipping write"
                );
            }
            return;
        }

        for write in writes {
            let Some(column) = mapping.column_for(write.field) else {
                // Merged fields without a mapped column have nowhere to go.
                continue;
            };

            match self
                .store
                .write_cell(write.row_index, column, &write.value)
                .await
            {
                Ok(()) => {
                    aggregator.record_write_applied();
                    tracing::debug!(
                        row = write.row_index,
                        column,
                        value = %write.value,
                        "cell updated"
                    );
                }
                Err(err) => {
                    aggregator.record_write_failed();
                    tracing::error!(
                        row = write.row_index,
                        column,
                        error = %err,
                        "cell write failed; continuing"
                    );
                }
            }
        }
    }
}

/// Builds query items from sheet rows: the mapped title column supplies the
/// query, every other mapped column feeds the existing-value snapshot. Rows
/// without a usable title are skipped.
fn build_items(rows: &[SheetRow], mapping: &FieldMapping) -> Vec<QueryItem> {
    let Some(title_column) = mapping.title_column() else {
        return Vec::new();
    };

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        let title = row
            .fields
            .get(title_column)
            .map(|value| value.trim())
            .unwrap_or_default();
        if title.is_empty() {
            tracing::debug!(row = row.row_index, "skipping row without a title");
            continue;
        }

        let existing = mapping
            .iter()
            .filter_map(|(column, field)| {
                row.fields
                    .get(column)
                    .map(|value| (field, value.clone()))
            })
            .collect();

        match QueryItem::new(row.row_index, title, existing) {
            Ok(item) => items.push(item),
            Err(err) => {
                tracing::warn!(row = row.row_index, error = %err, "skipping malformed row");
            }
        }
    }

    items
}
