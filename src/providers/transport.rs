//! Rate-limited retrying HTTP transport shared by every provider client.
//!
//! All network policy lives here: per-provider minimum call spacing,
//! exponential-backoff retries with `Retry-After` awareness, request
//! timeouts, and the pre-run connectivity probe. Provider clients only build
//! URLs and map response bodies.

use crate::providers::backoff::{retry_with_backoff, RetryBackoff, RetryDisposition};
use crate::providers::metrics::{TransportMetrics, TransportMetricsSnapshot};
use crate::providers::options::TransportOptions;
use crate::providers::ProviderId;
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

const CONNECTIVITY_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Public DNS resolvers probed before a run; one reachable endpoint is enough.
const CONNECTIVITY_PROBE_ENDPOINTS: [(&str, u16); 3] = [
    ("8.8.8.8", 53),
    ("1.1.1.1", 53),
    ("208.67.222.222", 53),
];

#[derive(Debug)]
pub enum TransportError {
    Timeout { provider: ProviderId },
    Status { provider: ProviderId, code: u16 },
    NoConnectivity,
    Exhausted { provider: ProviderId, attempts: usize },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout { provider } => {
                write!(f, "request to {provider} timed out")
            }
            TransportError::Status { provider, code } => {
                write!(f, "{provider} returned HTTP status {code}")
            }
            TransportError::NoConnectivity => {
                write!(f, "no network connectivity")
            }
            TransportError::Exhausted { provider, attempts } => {
                write!(f, "{provider} failed after {attempts} attempts")
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// HTTP status failure carrying the optional `Retry-After` hint. Internal to
/// the retry loop; exhaustion and final errors surface as [`TransportError`].
#[derive(Debug)]
struct StatusFailure {
    provider: ProviderId,
    code: u16,
    retry_after: Option<Duration>,
}

impl fmt::Display for StatusFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} returned HTTP status {}", self.provider, self.code)
    }
}

impl std::error::Error for StatusFailure {}

pub struct HttpTransport {
    client: reqwest::Client,
    options: TransportOptions,
    gates: Mutex<BTreeMap<ProviderId, Instant>>,
    metrics: Arc<TransportMetrics>,
    cancellation: CancellationToken,
}

impl HttpTransport {
    pub fn new(options: TransportOptions, cancellation: CancellationToken) -> Result<Self> {
        options.validate()?;

        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .user_agent(concat!("bibfetch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            options,
            gates: Mutex::new(BTreeMap::new()),
            metrics: Arc::new(TransportMetrics::default()),
            cancellation,
        })
    }

    pub fn metrics(&self) -> TransportMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Fails the run early when the network is unreachable, so per-item retry
    /// budgets are not burned while offline.
    pub async fn probe_connectivity(&self) -> Result<()> {
        for (host, port) in CONNECTIVITY_PROBE_ENDPOINTS {
            match timeout(CONNECTIVITY_PROBE_TIMEOUT, TcpStream::connect((host, port))).await {
                Ok(Ok(_)) => {
                    tracing::debug!(endpoint = host, "connectivity probe succeeded");
                    return Ok(());
                }
                Ok(Err(err)) => {
                    tracing::debug!(endpoint = host, error = %err, "connectivity probe failed");
                }
                Err(_) => {
                    tracing::debug!(endpoint = host, "connectivity probe timed out");
                }
            }
        }

        Err(TransportError::NoConnectivity.into())
    }

    /// Issues a rate-gated GET returning the parsed JSON body, retrying
    /// transient failures (timeouts, connection errors, HTTP 5xx and 429) on
    /// the exponential schedule. HTTP 429 honours `Retry-After` when present.
    pub async fn get_json(
        &self,
        provider: ProviderId,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<serde_json::Value> {
        let backoff = RetryBackoff::new(
            self.options.backoff_base,
            self.options.max_backoff,
            self.options.retry_attempts,
        )
        .with_cancellation(&self.cancellation);

        let result = retry_with_backoff(
            backoff,
            |attempt| self.perform_get(provider, url, query, attempt),
            |attempt, delay, err| {
                self.metrics.record_retry();
                tracing::warn!(
                    provider = %provider,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "provider call failed; retrying"
                );
            },
            |_, err| classify_failure(err),
        )
        .await;

        match result {
            Ok(value) => Ok(value),
            Err(err) if is_transient(&err) => {
                tracing::error!(
                    provider = %provider,
                    attempts = self.options.retry_attempts,
                    error = %err,
                    "provider exhausted retries"
                );
                Err(err.context(TransportError::Exhausted {
                    provider,
                    attempts: self.options.retry_attempts,
                }))
            }
            Err(err) => Err(err),
        }
    }

    async fn perform_get(
        &self,
        provider: ProviderId,
        url: &str,
        query: &[(&str, String)],
        attempt: usize,
    ) -> Result<serde_json::Value> {
        self.rate_gate(provider).await;

        tracing::trace!(provider = %provider, attempt, url, "dispatching provider request");

        let response = match self.client.get(url).query(query).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                self.metrics.record_timeout();
                return Err(anyhow!(err).context(TransportError::Timeout { provider }));
            }
            Err(err) => {
                self.metrics.record_failure();
                return Err(anyhow!(err).context(format!("request to {provider} failed")));
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.metrics.record_failure();
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            return Err(StatusFailure {
                provider,
                code: status.as_u16(),
                retry_after,
            }
            .into());
        }

        let value = match response.json::<serde_json::Value>().await {
            Ok(value) => value,
            Err(err) => {
                self.metrics.record_failure();
                return Err(anyhow!(err).context(format!("{provider} returned a malformed body")));
            }
        };

        self.metrics.record_success();
        Ok(value)
    }

    /// Reserves the next call slot for `provider` and sleeps until it opens.
    ///
    /// The slot is claimed under the lock (check-and-set) so two concurrent
    /// callers can never both pass the gate inside one spacing window; the
    /// sleep itself happens outside the lock.
    async fn rate_gate(&self, provider: ProviderId) {
        let now = Instant::now();
        let ready_at = {
            let mut gates = self.gates.lock().unwrap();
            let ready_at = match gates.get(&provider) {
                Some(last) => (*last + self.options.rate_limit_delay).max(now),
                None => now,
            };
            gates.insert(provider, ready_at);
            ready_at
        };

        if ready_at > now {
            self.metrics.record_rate_gate_wait();
            tracing::trace!(
                provider = %provider,
                wait_ms = (ready_at - now).as_millis() as u64,
                "waiting on provider rate gate"
            );
            sleep_until(ready_at).await;
        }
    }
}

/// Parses a `Retry-After` header value. Only the delta-seconds form is
/// honoured; HTTP-date values fall back to the exponential schedule.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn classify_failure(err: &anyhow::Error) -> RetryDisposition {
    if let Some(failure) = err.downcast_ref::<StatusFailure>() {
        return match failure.code {
            429 => match failure.retry_after {
                Some(delay) => RetryDisposition::RetryAfter(delay),
                None => RetryDisposition::Retry,
            },
            code if (500..600).contains(&code) => RetryDisposition::Retry,
            _ => RetryDisposition::Abort,
        };
    }

    if err.downcast_ref::<TransportError>().is_some_and(|transport| {
        matches!(transport, TransportError::Timeout { .. })
    }) {
        return RetryDisposition::Retry;
    }

    if let Some(request_err) = err.downcast_ref::<reqwest::Error>() {
        if request_err.is_timeout() || request_err.is_connect() {
            return RetryDisposition::Retry;
        }
    }

    RetryDisposition::Abort
}

fn is_transient(err: &anyhow::Error) -> bool {
    !matches!(classify_failure(err), RetryDisposition::Abort)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(code: u16, retry_after: Option<Duration>) -> anyhow::Error {
        StatusFailure {
            provider: ProviderId::GoogleBooks,
            code,
            retry_after,
        }
        .into()
    }

    #[test]
    fn server_errors_are_transient() {
        for code in [500, 502, 503, 504] {
            assert!(matches!(
                classify_failure(&status_error(code, None)),
                RetryDisposition::Retry
            ));
        }
    }

    #[test]
    fn client_errors_abort_except_throttling() {
        for code in [400, 403, 404] {
            assert!(matches!(
                classify_failure(&status_error(code, None)),
                RetryDisposition::Abort
            ));
        }

        assert!(matches!(
            classify_failure(&status_error(429, None)),
            RetryDisposition::Retry
        ));
        assert!(matches!(
            classify_failure(&status_error(429, Some(Duration::from_secs(7)))),
            RetryDisposition::RetryAfter(delay) if delay == Duration::from_secs(7)
        ));
    }

    #[test]
    fn timeouts_are_transient() {
        let err: anyhow::Error = anyhow!("inner").context(TransportError::Timeout {
            provider: ProviderId::OpenLibrary,
        });
        assert!(matches!(classify_failure(&err), RetryDisposition::Retry));
        assert!(is_transient(&err));
    }

    #[test]
    fn unknown_errors_abort() {
        let err = anyhow!("malformed body");
        assert!(matches!(classify_failure(&err), RetryDisposition::Abort));
        assert!(!is_transient(&err));
    }

    #[test]
    fn retry_after_parses_delta_seconds_only() {
        assert_eq!(parse_retry_after("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_gate_enforces_spacing_per_provider() {
        let options = TransportOptions {
            rate_limit_delay: Duration::from_millis(1_000),
            ..TransportOptions::default()
        };
        let transport = HttpTransport::new(options, CancellationToken::new()).unwrap();

        let start = Instant::now();
        transport.rate_gate(ProviderId::GoogleBooks).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        // Second call to the same provider waits out the spacing window.
        transport.rate_gate(ProviderId::GoogleBooks).await;
        assert!(start.elapsed() >= Duration::from_millis(1_000));

        // A different provider has its own gate and passes immediately.
        let before = Instant::now();
        transport.rate_gate(ProviderId::OpenLibrary).await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_gate_reserves_slots_for_queued_callers() {
        let options = TransportOptions {
            rate_limit_delay: Duration::from_millis(500),
            ..TransportOptions::default()
        };
        let transport =
            Arc::new(HttpTransport::new(options, CancellationToken::new()).unwrap());

        let start = Instant::now();
        let first = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.rate_gate(ProviderId::GoogleBooks).await })
        };
        let second = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.rate_gate(ProviderId::GoogleBooks).await })
        };
        let third = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.rate_gate(ProviderId::GoogleBooks).await })
        };

        first.await.unwrap();
        second.await.unwrap();
        third.await.unwrap();

        // Three concurrent callers occupy three consecutive slots.
        assert!(start.elapsed() >= Duration::from_millis(1_000));
    }
}
