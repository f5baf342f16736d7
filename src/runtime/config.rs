use crate::merge::MetadataField;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

const DEFAULT_RETRY_ATTEMPTS: usize = 5;
const DEFAULT_BACKOFF_FACTOR_SECS: f64 = 1.0;
const DEFAULT_RATE_LIMIT_DELAY_SECS: f64 = 1.0;
const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 15.0;
const DEFAULT_MAX_WORKERS: usize = 3;
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_MATCH_THRESHOLD: f64 = 0.75;
const DEFAULT_CANCELLATION_GRACE_SECS: f64 = 5.0;

/// Configuration problems that are fatal at startup, before any item is
/// processed.
#[derive(Debug, Clone)]
pub enum ConfigError {
    MissingRequiredField { field: &'static str },
    InvalidMapping { column: String, target: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingRequiredField { field } => {
                write!(f, "field mapping must map some column to {field:?}")
            }
            ConfigError::InvalidMapping { column, target } => {
                write!(
                    f,
                    "column {column:?} maps to unknown internal field {target:?}"
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Sheet-column-to-internal-field mapping, validated against the closed
/// [`MetadataField`] set. Columns absent from the mapping are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    columns: BTreeMap<String, MetadataField>,
}

impl FieldMapping {
    /// Builds a mapping from `(column, internal field name)` pairs, rejecting
    /// unknown targets.
    pub fn from_pairs<I, C, T>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (C, T)>,
        C: Into<String>,
        T: AsRef<str>,
    {
        let mut columns = BTreeMap::new();
        for (column, target) in pairs {
            let column = column.into();
            let field = target
                .as_ref()
                .parse::<MetadataField>()
                .map_err(|_| ConfigError::InvalidMapping {
                    column: column.clone(),
                    target: target.as_ref().to_string(),
                })?;
            columns.insert(column, field);
        }
        Ok(Self { columns })
    }

    /// The mapping the original spreadsheet layout uses.
    pub fn default_mapping() -> Self {
        Self::from_pairs([
            ("Title", "title"),
            ("Author", "authors"),
            ("Genre", "categories"),
            ("Publisher", "publisher"),
            ("Publication Year", "published_date"),
            ("ISBN", "isbn"),
            ("Pages", "page_count"),
            ("Language", "language"),
            ("Description", "description"),
        ])
        .expect("default field mapping only uses known fields")
    }

    /// The column holding query titles, if one is mapped.
    pub fn title_column(&self) -> Option<&str> {
        self.column_for(MetadataField::Title)
    }

    /// First column mapped to `field`, in column order.
    pub fn column_for(&self, field: MetadataField) -> Option<&str> {
        self.columns
            .iter()
            .find(|(_, mapped)| **mapped == field)
            .map(|(column, _)| column.as_str())
    }

    pub fn field_for(&self, column: &str) -> Option<MetadataField> {
        self.columns.get(column).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, MetadataField)> {
        self.columns
            .iter()
            .map(|(column, field)| (column.as_str(), *field))
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Runtime configuration for the enrichment pipeline.
///
/// All instances must be constructed via [`EnrichmentConfig::builder`] (or
/// [`EnrichmentConfig::from_file`]) so invariants are validated before any
/// consumer observes the values.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentConfig {
    retry_attempts: usize,
    backoff_factor: Duration,
    rate_limit_delay: Duration,
    request_timeout: Duration,
    max_workers: usize,
    batch_size: usize,
    batch_pause: Duration,
    match_threshold: f64,
    cancellation_grace: Duration,
    metrics_interval: Duration,
    field_mapping: FieldMapping,
    dry_run: bool,
}

impl EnrichmentConfig {
    pub fn builder() -> EnrichmentConfigBuilder {
        EnrichmentConfigBuilder::default()
    }

    /// Loads overrides from a JSON config file on top of the defaults.
    ///
    /// A missing file is not an error; the defaults apply unchanged, matching
    /// how an operator bootstraps a fresh setup.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "config file not found; using defaults");
            return Self::builder().build();
        }

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let file: ConfigFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        file.into_builder()?.build()
    }

    /// Maximum calls per provider request, counting the first attempt.
    pub fn retry_attempts(&self) -> usize {
        self.retry_attempts
    }

    /// Backoff before the second attempt; doubles per retry.
    pub fn backoff_factor(&self) -> Duration {
        self.backoff_factor
    }

    /// Minimum spacing between successive calls to the same provider.
    pub fn rate_limit_delay(&self) -> Duration {
        self.rate_limit_delay
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Concurrent item pipelines per batch.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Courtesy pause between batches.
    pub fn batch_pause(&self) -> Duration {
        self.batch_pause
    }

    /// Minimum similarity score a candidate must reach to be accepted.
    pub fn match_threshold(&self) -> f64 {
        self.match_threshold
    }

    /// How long in-flight items may run after cancellation.
    pub fn cancellation_grace(&self) -> Duration {
        self.cancellation_grace
    }

    /// Interval used by the metrics reporter task.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn field_mapping(&self) -> &FieldMapping {
        &self.field_mapping
    }

    /// When set, outcomes are computed but no cell writes are issued.
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_attempts == 0 {
            bail!("retry_attempts must be greater than 0");
        }
        if self.backoff_factor.is_zero() {
            bail!("backoff_factor must be greater than 0");
        }
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.max_workers == 0 {
            bail!("max_workers must be greater than 0");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.match_threshold) {
            bail!("match_threshold must be within [0.0, 1.0]");
        }
        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }
        if self.field_mapping.is_empty() {
            bail!("field_mapping cannot be empty");
        }
        if self.field_mapping.title_column().is_none() {
            return Err(ConfigError::MissingRequiredField { field: "title" }.into());
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct EnrichmentConfigBuilder {
    retry_attempts: Option<usize>,
    backoff_factor: Option<Duration>,
    rate_limit_delay: Option<Duration>,
    request_timeout: Option<Duration>,
    max_workers: Option<usize>,
    batch_size: Option<usize>,
    batch_pause: Option<Duration>,
    match_threshold: Option<f64>,
    cancellation_grace: Option<Duration>,
    metrics_interval: Option<Duration>,
    field_mapping: Option<FieldMapping>,
    dry_run: Option<bool>,
}

impl EnrichmentConfigBuilder {
    pub fn retry_attempts(mut self, attempts: usize) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    pub fn backoff_factor(mut self, base: Duration) -> Self {
        self.backoff_factor = Some(base);
        self
    }

    pub fn rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = Some(delay);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    pub fn batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = Some(pause);
        self
    }

    pub fn match_threshold(mut self, threshold: f64) -> Self {
        self.match_threshold = Some(threshold);
        self
    }

    pub fn cancellation_grace(mut self, grace: Duration) -> Self {
        self.cancellation_grace = Some(grace);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn field_mapping(mut self, mapping: FieldMapping) -> Self {
        self.field_mapping = Some(mapping);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = Some(dry_run);
        self
    }

    pub fn build(self) -> Result<EnrichmentConfig> {
        let config = EnrichmentConfig {
            retry_attempts: self.retry_attempts.unwrap_or(DEFAULT_RETRY_ATTEMPTS),
            backoff_factor: self
                .backoff_factor
                .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_BACKOFF_FACTOR_SECS)),
            rate_limit_delay: self
                .rate_limit_delay
                .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_RATE_LIMIT_DELAY_SECS)),
            request_timeout: self
                .request_timeout
                .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_SECS)),
            max_workers: self.max_workers.unwrap_or(DEFAULT_MAX_WORKERS),
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            batch_pause: self.batch_pause.unwrap_or(Duration::ZERO),
            match_threshold: self.match_threshold.unwrap_or(DEFAULT_MATCH_THRESHOLD),
            cancellation_grace: self
                .cancellation_grace
                .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_CANCELLATION_GRACE_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            field_mapping: self
                .field_mapping
                .unwrap_or_else(FieldMapping::default_mapping),
            dry_run: self.dry_run.unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }
}

/// On-disk JSON shape, all fields optional. Durations are seconds.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    retry_attempts: Option<usize>,
    backoff_factor: Option<f64>,
    rate_limit_delay: Option<f64>,
    request_timeout: Option<f64>,
    max_workers: Option<usize>,
    batch_size: Option<usize>,
    batch_pause: Option<f64>,
    match_threshold: Option<f64>,
    field_mapping: Option<BTreeMap<String, String>>,
    dry_run: Option<bool>,
}

impl ConfigFile {
    fn into_builder(self) -> Result<EnrichmentConfigBuilder> {
        let mut builder = EnrichmentConfig::builder();

        if let Some(attempts) = self.retry_attempts {
            builder = builder.retry_attempts(attempts);
        }
        if let Some(secs) = self.backoff_factor {
            builder = builder.backoff_factor(duration_from_secs(secs, "backoff_factor")?);
        }
        if let Some(secs) = self.rate_limit_delay {
            builder = builder.rate_limit_delay(duration_from_secs(secs, "rate_limit_delay")?);
        }
        if let Some(secs) = self.request_timeout {
            builder = builder.request_timeout(duration_from_secs(secs, "request_timeout")?);
        }
        if let Some(workers) = self.max_workers {
            builder = builder.max_workers(workers);
        }
        if let Some(size) = self.batch_size {
            builder = builder.batch_size(size);
        }
        if let Some(secs) = self.batch_pause {
            builder = builder.batch_pause(duration_from_secs(secs, "batch_pause")?);
        }
        if let Some(threshold) = self.match_threshold {
            builder = builder.match_threshold(threshold);
        }
        if let Some(mapping) = self.field_mapping {
            builder = builder.field_mapping(FieldMapping::from_pairs(mapping)?);
        }
        if let Some(dry_run) = self.dry_run {
            builder = builder.dry_run(dry_run);
        }

        Ok(builder)
    }
}

fn duration_from_secs(secs: f64, field: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .with_context(|| format!("{field} must be a non-negative duration in seconds"))
}
