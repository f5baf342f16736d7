//! Configurable knobs for the provider transport along with validation
//! helpers so callers can reason about timeouts, rate gating, and
//! retry/backoff limits.

use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_RETRY_ATTEMPTS: usize = 5;
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_RATE_LIMIT_DELAY_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub request_timeout: Duration,
    /// Maximum calls per provider request, counting the first attempt.
    pub retry_attempts: usize,
    /// Backoff before the second attempt; doubles per retry.
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    /// Minimum spacing between successive calls to the same provider.
    pub rate_limit_delay: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            rate_limit_delay: Duration::from_millis(DEFAULT_RATE_LIMIT_DELAY_MS),
        }
    }
}

impl TransportOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.retry_attempts == 0 {
            bail!("retry_attempts must be greater than 0");
        }
        if self.backoff_base.is_zero() {
            bail!("backoff_base must be greater than 0");
        }
        if self.max_backoff < self.backoff_base {
            bail!("max_backoff must be at least backoff_base");
        }
        Ok(())
    }
}
