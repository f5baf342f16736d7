use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy)]
pub(crate) struct RetryBackoff<'a> {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: usize,
    pub cancellation: Option<&'a CancellationToken>,
}

impl<'a> RetryBackoff<'a> {
    pub(crate) fn new(initial_delay: Duration, max_delay: Duration, max_attempts: usize) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_attempts,
            cancellation: None,
        }
    }

    pub(crate) fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

pub(crate) enum RetryDisposition {
    /// Retry on the exponential schedule.
    Retry,
    /// Retry after a server-directed delay (e.g. a `Retry-After` header),
    /// overriding the exponential schedule for this attempt only.
    RetryAfter(Duration),
    /// Non-transient failure; surface the error immediately.
    Abort,
}

/// Runs `operation` up to `max_attempts` times, doubling the backoff delay
/// after each retried failure. `classify_error` decides whether a failure is
/// transient; `on_retry` observes each retried attempt for logging.
///
/// Backoff sleeps suspend only the calling task and abort early when the
/// cancellation token fires.
pub(crate) async fn retry_with_backoff<'a, T, F, Fut, L, C>(
    config: RetryBackoff<'a>,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
    L: FnMut(usize, Duration, &anyhow::Error),
    C: FnMut(usize, &anyhow::Error) -> RetryDisposition,
{
    let mut attempt = 0;
    let mut backoff = config.initial_delay;

    loop {
        attempt += 1;

        if let Some(token) = config.cancellation {
            if token.is_cancelled() {
                return Err(anyhow!("retry cancelled"));
            }
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let delay = match classify_error(attempt, &err) {
                    RetryDisposition::Abort => return Err(err),
                    RetryDisposition::Retry => backoff,
                    RetryDisposition::RetryAfter(server_delay) => server_delay,
                };

                if attempt >= config.max_attempts {
                    return Err(err);
                }

                on_retry(attempt, delay, &err);
                sleep_with_cancellation(delay, config.cancellation).await?;
                backoff = next_backoff(backoff, config.max_delay);
            }
        }
    }
}

async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<()> {
    if delay.is_zero() {
        yield_now().await;
        return Ok(());
    }

    if let Some(token) = cancellation {
        tokio::select! {
            _ = token.cancelled() => Err(anyhow!("retry cancelled")),
            _ = sleep(delay) => Ok(()),
        }
    } else {
        sleep(delay).await;
        Ok(())
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
