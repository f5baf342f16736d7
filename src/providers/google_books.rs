//! Client for the Google Books volumes search API: the primary, richer
//! structured source.

use crate::merge::MetadataField;
use crate::providers::transport::HttpTransport;
use crate::providers::{ProviderClient, ProviderId, RawCandidate};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::Arc;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/books/v1/volumes";
const DEFAULT_MAX_RESULTS: usize = 5;
const DESCRIPTION_LIMIT_CHARS: usize = 500;

pub struct GoogleBooksClient {
    transport: Arc<HttpTransport>,
    base_url: String,
    max_results: usize,
}

impl GoogleBooksClient {
    pub fn new(transport: Arc<HttpTransport>) -> Self {
        Self::with_base_url(transport, DEFAULT_BASE_URL)
    }

    /// Overridable endpoint so tests can point the client at a local server.
    pub fn with_base_url(transport: Arc<HttpTransport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into(),
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

impl ProviderClient for GoogleBooksClient {
    fn id(&self) -> ProviderId {
        ProviderId::GoogleBooks
    }

    fn lookup<'a>(&'a self, title: &'a str) -> BoxFuture<'a, Result<Vec<RawCandidate>>> {
        Box::pin(async move {
            let query = [
                ("q", format!("intitle:\"{title}\"")),
                ("maxResults", self.max_results.to_string()),
                ("printType", "books".to_string()),
            ];

            let body = self
                .transport
                .get_json(ProviderId::GoogleBooks, &self.base_url, &query)
                .await?;

            let candidates = parse_volumes(&body);
            tracing::debug!(
                title,
                candidates = candidates.len(),
                "google books lookup completed"
            );
            Ok(candidates)
        })
    }
}

fn parse_volumes(body: &serde_json::Value) -> Vec<RawCandidate> {
    let Some(items) = body.get("items").and_then(|value| value.as_array()) else {
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(rank, item)| {
            let info = item.get("volumeInfo")?;
            let title = info.get("title").and_then(|value| value.as_str())?;

            let mut fields = BTreeMap::new();
            insert_nonempty(&mut fields, MetadataField::Title, title.to_string());
            insert_nonempty(
                &mut fields,
                MetadataField::Authors,
                join_strings(info.get("authors"), usize::MAX),
            );
            insert_nonempty(
                &mut fields,
                MetadataField::Publisher,
                info.get("publisher")
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .to_string(),
            );
            insert_nonempty(
                &mut fields,
                MetadataField::PublishedDate,
                extract_year(
                    info.get("publishedDate")
                        .and_then(|value| value.as_str())
                        .unwrap_or_default(),
                ),
            );
            insert_nonempty(
                &mut fields,
                MetadataField::Isbn,
                pick_isbn(info.get("industryIdentifiers")),
            );
            insert_nonempty(
                &mut fields,
                MetadataField::Categories,
                join_strings(info.get("categories"), usize::MAX),
            );
            if let Some(pages) = info.get("pageCount").and_then(|value| value.as_u64()) {
                if pages > 0 {
                    fields.insert(MetadataField::PageCount, pages.to_string());
                }
            }
            insert_nonempty(
                &mut fields,
                MetadataField::Language,
                info.get("language")
                    .and_then(|value| value.as_str())
                    .unwrap_or_default()
                    .to_string(),
            );
            insert_nonempty(
                &mut fields,
                MetadataField::Description,
                truncate_description(
                    info.get("description")
                        .and_then(|value| value.as_str())
                        .unwrap_or_default(),
                ),
            );

            Some(RawCandidate {
                provider: ProviderId::GoogleBooks,
                title: title.to_string(),
                fields,
                rank,
            })
        })
        .collect()
}

pub(crate) fn insert_nonempty(
    fields: &mut BTreeMap<MetadataField, String>,
    field: MetadataField,
    value: String,
) {
    if !value.trim().is_empty() {
        fields.insert(field, value);
    }
}

/// Joins up to `limit` string elements of a JSON array with ", ".
pub(crate) fn join_strings(value: Option<&serde_json::Value>, limit: usize) -> String {
    let Some(items) = value.and_then(|value| value.as_array()) else {
        return String::new();
    };

    items
        .iter()
        .filter_map(|item| item.as_str())
        .take(limit)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Prefers ISBN-13, falling back to ISBN-10 when that is all the volume has.
fn pick_isbn(identifiers: Option<&serde_json::Value>) -> String {
    let Some(identifiers) = identifiers.and_then(|value| value.as_array()) else {
        return String::new();
    };

    let mut isbn10 = String::new();
    for identifier in identifiers {
        let kind = identifier.get("type").and_then(|value| value.as_str());
        let value = identifier
            .get("identifier")
            .and_then(|value| value.as_str())
            .unwrap_or_default();

        match kind {
            Some("ISBN_13") if !value.is_empty() => return value.to_string(),
            Some("ISBN_10") if isbn10.is_empty() => isbn10 = value.to_string(),
            _ => {}
        }
    }
    isbn10
}

/// Pulls a plausible four-digit year (19xx/20xx) out of a free-form date
/// string, falling back to the first four characters.
pub(crate) fn extract_year(date: &str) -> String {
    let chars: Vec<char> = date.chars().collect();
    let mut run_start = None;

    for (idx, ch) in chars.iter().enumerate() {
        match (ch.is_ascii_digit(), run_start) {
            (true, None) => run_start = Some(idx),
            (false, Some(start)) => {
                if let Some(year) = year_from_run(&chars[start..idx]) {
                    return year;
                }
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        if let Some(year) = year_from_run(&chars[start..]) {
            return year;
        }
    }

    chars.iter().take(4).collect()
}

fn year_from_run(run: &[char]) -> Option<String> {
    if run.len() != 4 {
        return None;
    }
    let prefix: String = run[..2].iter().collect();
    if prefix == "19" || prefix == "20" {
        Some(run.iter().collect())
    } else {
        None
    }
}

fn truncate_description(description: &str) -> String {
    if description.chars().count() <= DESCRIPTION_LIMIT_CHARS {
        return description.to_string();
    }
    let truncated: String = description.chars().take(DESCRIPTION_LIMIT_CHARS).collect();
    format!("{truncated}...")
}
