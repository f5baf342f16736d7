//! The concurrent fetch-and-merge pipeline.
//!
//! The batch scheduler partitions items, runs each item's full pipeline
//! (provider fetches, matching, merging) under a bounded worker cap, and
//! delivers one terminal [`outcome::FetchOutcome`] per item to the
//! [`aggregator::OutcomeAggregator`].

pub mod aggregator;
pub mod outcome;
pub mod scheduler;

pub use aggregator::{OutcomeAggregator, PendingWrite, RunStatistics};
pub use outcome::{FailureKind, FetchOutcome, QueryItem};
pub use scheduler::{BatchScheduler, BatchSchedulerParams};
