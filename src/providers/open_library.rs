//! Client for the Open Library search API: the secondary, sparser source.

use crate::merge::MetadataField;
use crate::providers::google_books::{insert_nonempty, join_strings};
use crate::providers::transport::HttpTransport;
use crate::providers::{ProviderClient, ProviderId, RawCandidate};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://openlibrary.org/search.json";
const DEFAULT_RESULT_LIMIT: usize = 5;

// The search API returns every known publisher/subject/language for a work;
// only the leading few are useful as cell values.
const PUBLISHER_LIMIT: usize = 3;
const SUBJECT_LIMIT: usize = 5;
const LANGUAGE_LIMIT: usize = 2;

pub struct OpenLibraryClient {
    transport: Arc<HttpTransport>,
    base_url: String,
    result_limit: usize,
}

impl OpenLibraryClient {
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self::with_base_url(transport, DEFAULT_BASE_URL)
    }

    /// Overridable endpoint so tests can point the client at a local server.
    pub fn with_base_url(transport: Arc<HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            result_limit: DEFAULT_RESULT_LIMIT,
        }
    }
}

impl ProviderClient for OpenLibraryClient {
    fn id(&self) -> ProviderId {
        ProviderId::OpenLibrary
    }

    fn lookup<'a>(&'a self, title: &'a str) -> BoxFuture<'a, Result<Vec<RawCandidate>>> {
        Box::pin(async move {
            let query = [
                ("title", title.to_string()),
                ("limit", self.result_limit.to_string()),
            ];

            let body = self
                .transport
                .get_json(ProviderId::OpenLibrary, &self.base_url, &query)
                .await?;

            let candidates = parse_docs(&body);
            tracing::debug!(
                title,
                candidates = candidates.len(),
                "open library lookup completed"
            );
            Ok(candidates)
        })
    }
}

fn parse_docs(body: &serde_json::Value) -> Vec<RawCandidate> {
    let Some(docs) = body.get("docs").and_then(|value| value.as_array()) else {
        return Vec::new();
    };

    docs.iter()
        .enumerate()
        .filter_map(|(rank, doc)| {
            let title = doc.get("title").and_then(|value| value.as_str())?;

            let mut fields = BTreeMap::new();
            insert_nonempty(&mut fields, MetadataField::Title, title.to_string());
            insert_nonempty(
                &mut fields,
                MetadataField::Authors,
                join_strings(doc.get("author_name"), usize::MAX),
            );
            insert_nonempty(
                &mut fields,
                MetadataField::Publisher,
                join_strings(doc.get("publisher"), PUBLISHER_LIMIT),
            );
            if let Some(year) = doc.get("first_publish_year").and_then(|value| value.as_i64()) {
                fields.insert(MetadataField::PublishedDate, year.to_string());
            }
            insert_nonempty(
                &mut fields,
                MetadataField::Isbn,
                doc.get("isbn")
                    .and_then(|value| value.as_array())
                    .and_then(|isbns| isbns.first())
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .to_string(),
            );
            insert_nonempty(
                &mut fields,
                MetadataField::Categories,
                join_strings(doc.get("subject"), SUBJECT_LIMIT),
            );
            if let Some(pages) = doc
                .get("number_of_pages_median")
                .and_then(|value| value.as_u64())
            {
                if pages > 0 {
                    fields.insert(MetadataField::PageCount, pages.to_string());
                }
            }
            insert_nonempty(
                &mut fields,
                MetadataField::Language,
                join_strings(doc.get("language"), LANGUAGE_LIMIT),
            );

            Some(RawCandidate {
                provider: ProviderId::OpenLibrary,
                title: title.to_string(),
                fields,
                rank,
            })
        })
        .collect()
}
