pub mod matcher;
pub mod merge;
pub mod pipeline;
pub mod providers;
pub mod runtime;
pub mod store;

pub use matcher::{best_match, normalize_title, title_similarity, ScoredCandidate};
pub use merge::{merge, MergedRecord, MetadataField, ResolvedField};
pub use pipeline::{
    BatchScheduler, BatchSchedulerParams, FailureKind, FetchOutcome, OutcomeAggregator,
    PendingWrite, QueryItem, RunStatistics,
};
pub use providers::{
    google_books::GoogleBooksClient, open_library::OpenLibraryClient, HttpTransport,
    ProviderClient, ProviderId, RawCandidate, TransportError, TransportOptions,
};
pub use runtime::config::{ConfigError, EnrichmentConfig, EnrichmentConfigBuilder, FieldMapping};
pub use runtime::runner::Runner;
pub use runtime::telemetry::{init_tracing, spawn_metrics_reporter};
pub use store::{MemoryRowStore, RowStore, SheetRow, StoreError};
