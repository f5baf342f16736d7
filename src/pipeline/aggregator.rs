//! Run-wide accumulation of per-item outcomes and pending writes.

use crate::merge::MetadataField;
use crate::pipeline::outcome::{FetchOutcome, QueryItem};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// One cell write owed to the row store: produced for every field of a
/// matched item's merged record, consumed by the write applier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub row_index: u64,
    pub field: MetadataField,
    pub value: String,
}

/// Read-only view of the aggregator's counters, taken at the end of a run
/// (or mid-run by the metrics reporter).
#[derive(Debug, Clone, Default)]
pub struct RunStatistics {
    pub processed: u64,
    pub matched: u64,
    pub no_match: u64,
    pub failed: u64,
    pub writes_applied: u64,
    pub writes_failed: u64,
    pub error_kinds: BTreeMap<String, u64>,
}

/// Accumulates outcomes delivered concurrently from in-flight items.
///
/// Counter updates use atomics; the error-kind map and the pending write
/// list sit behind mutexes. Ordering of writes across items is irrelevant,
/// so appends take no further coordination.
#[derive(Debug, Default)]
pub struct OutcomeAggregator {
    processed: AtomicU64,
    matched: AtomicU64,
    no_match: AtomicU64,
    failed: AtomicU64,
    writes_applied: AtomicU64,
    writes_failed: AtomicU64,
    error_kinds: Mutex<BTreeMap<String, u64>>,
    pending_writes: Mutex<Vec<PendingWrite>>,
}

impl OutcomeAggregator {
    /// Records one item's terminal outcome, queueing a pending write per
    /// merged field when the item matched.
    pub fn record(&self, item: &QueryItem, outcome: &FetchOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);

        match outcome {
            FetchOutcome::Matched(record) => {
                self.matched.fetch_add(1, Ordering::Relaxed);

                let mut pending = self.pending_writes.lock().unwrap();
                for (field, resolved) in record.iter() {
                    pending.push(PendingWrite {
                        row_index: item.row_index(),
                        field,
                        value: resolved.value.clone(),
                    });
                }

                tracing::info!(
                    row = item.row_index(),
                    title = item.title(),
                    fields = record.len(),
                    "item matched"
                );
            }
            FetchOutcome::NoMatch => {
                self.no_match.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    row = item.row_index(),
                    title = item.title(),
                    "no candidate cleared the match threshold"
                );
            }
            FetchOutcome::Failed { kind, message } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                let mut kinds = self.error_kinds.lock().unwrap();
                *kinds.entry(kind.as_str().to_string()).or_insert(0) += 1;
                tracing::warn!(
                    row = item.row_index(),
                    title = item.title(),
                    kind = %kind,
                    message = %message,
                    "item failed"
                );
            }
        }
    }

    pub fn record_write_applied(&self) {
        self.writes_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failed(&self) {
        self.writes_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Drains the queued writes, leaving the aggregator's counters intact.
    pub fn take_pending_writes(&self) -> Vec<PendingWrite> {
        std::mem::take(&mut *self.pending_writes.lock().unwrap())
    }

    pub fn pending_write_count(&self) -> usize {
        self.pending_writes.lock().unwrap().len()
    }

    pub fn snapshot(&self) -> RunStatistics {
        RunStatistics {
            processed: self.processed.load(Ordering::Relaxed),
            matched: self.matched.load(Ordering::Relaxed),
            no_match: self.no_match.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            writes_applied: self.writes_applied.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            error_kinds: self.error_kinds.lock().unwrap().clone(),
        }
    }
}
