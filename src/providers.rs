//! Provider clients and the rate-limited retrying transport beneath them.
//!
//! Each provider exposes the same "lookup by title" capability and returns
//! zero or more raw candidates; everything network-shaped (timeouts, retries,
//! backoff, per-provider rate gating, connectivity probing) lives in
//! [`transport::HttpTransport`] so the clients stay thin response mappers.

pub mod backoff;
pub mod google_books;
pub mod metrics;
pub mod open_library;
pub mod options;
pub mod transport;

use crate::merge::MetadataField;
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;

/// Identity of an external metadata source.
///
/// The variant order is not significant; merge priority comes from
/// [`ProviderId::priority`] so reordering the enum cannot silently change
/// merge results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderId {
    GoogleBooks,
    OpenLibrary,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::GoogleBooks => "google_books",
            ProviderId::OpenLibrary => "open_library",
        }
    }

    /// Merge priority: lower values win field conflicts. The Google-Books
    /// style source returns the richer structured fields and is consulted
    /// first.
    pub fn priority(&self) -> u8 {
        match self {
            ProviderId::GoogleBooks => 0,
            ProviderId::OpenLibrary => 1,
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single provider's proposed record for a query title.
///
/// Ephemeral: produced by a provider client, consumed by the matcher. `rank`
/// is the provider-native result order (0 = first result) and is used only
/// as a tie-break between equally scored candidates.
#[derive(Debug, Clone)]
pub struct RawCandidate {
    pub provider: ProviderId,
    pub title: String,
    pub fields: BTreeMap<MetadataField, String>,
    pub rank: usize,
}

/// Uniform lookup capability implemented by every provider client.
///
/// Mock implementations drive the integration tests; the concrete clients in
/// [`google_books`] and [`open_library`] speak the real search APIs.
pub trait ProviderClient: Send + Sync {
    fn id(&self) -> ProviderId;

    fn lookup<'a>(&'a self, title: &'a str) -> BoxFuture<'a, Result<Vec<RawCandidate>>>;
}

pub use metrics::{TransportMetrics, TransportMetricsSnapshot};
pub use options::TransportOptions;
pub use transport::{HttpTransport, TransportError};
