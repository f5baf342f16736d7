//! Lightweight counters tracking provider-call successes, failures, and
//! retries so the transport can expose aggregated snapshots without leaking
//! implementation details to downstream consumers.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct TransportMetrics {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    total_timeouts: AtomicU64,
    total_retries: AtomicU64,
    rate_gate_waits: AtomicU64,
}

impl TransportMetrics {
    pub fn record_success(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.record_failure();
        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_gate_wait(&self) {
        self.rate_gate_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TransportMetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);

        let error_rate = if total_requests == 0 {
            0.0
        } else {
            total_errors as f64 / total_requests as f64
        };

        TransportMetricsSnapshot {
            total_requests,
            total_errors,
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            rate_gate_waits: self.rate_gate_waits.load(Ordering::Relaxed),
            error_rate,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TransportMetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_timeouts: u64,
    pub total_retries: u64,
    pub rate_gate_waits: u64,
    pub error_rate: f64,
}
