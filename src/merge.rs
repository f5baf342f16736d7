//! Field-level merging of scored candidates into one record per item.
//!
//! Merging is pure: the same scored-candidate set and existing-row snapshot
//! always produce a byte-identical [`MergedRecord`]. Provider priority is the
//! only tie-break, and it is fixed by [`ProviderId::priority`].

use crate::matcher::ScoredCandidate;
use crate::providers::ProviderId;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Closed set of internal metadata fields. Field-mapping targets outside this
/// set are rejected at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetadataField {
    Title,
    Authors,
    Publisher,
    PublishedDate,
    Isbn,
    Categories,
    PageCount,
    Language,
    Description,
}

impl MetadataField {
    /// All fields in merge order. The merger walks this slice so output field
    /// order never depends on map iteration.
    pub const ALL: [MetadataField; 9] = [
        MetadataField::Title,
        MetadataField::Authors,
        MetadataField::Publisher,
        MetadataField::PublishedDate,
        MetadataField::Isbn,
        MetadataField::Categories,
        MetadataField::PageCount,
        MetadataField::Language,
        MetadataField::Description,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::Title => "title",
            MetadataField::Authors => "authors",
            MetadataField::Publisher => "publisher",
            MetadataField::PublishedDate => "published_date",
            MetadataField::Isbn => "isbn",
            MetadataField::Categories => "categories",
            MetadataField::PageCount => "page_count",
            MetadataField::Language => "language",
            MetadataField::Description => "description",
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataField {
    type Err = UnknownFieldError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "title" => Ok(MetadataField::Title),
            "authors" => Ok(MetadataField::Authors),
            "publisher" => Ok(MetadataField::Publisher),
            "published_date" => Ok(MetadataField::PublishedDate),
            "isbn" => Ok(MetadataField::Isbn),
            "categories" => Ok(MetadataField::Categories),
            "page_count" => Ok(MetadataField::PageCount),
            "language" => Ok(MetadataField::Language),
            "description" => Ok(MetadataField::Description),
            other => Err(UnknownFieldError {
                name: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UnknownFieldError {
    pub name: String,
}

impl fmt::Display for UnknownFieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown metadata field {:?}", self.name)
    }
}

impl std::error::Error for UnknownFieldError {}

/// A resolved field value and the provider that contributed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub value: String,
    pub provenance: ProviderId,
}

/// One output record per query item: resolved values keyed by field, each
/// carrying the exact contributing provider.
///
/// A field is present only when at least one provider supplied a non-empty
/// value for it; omission is distinct from an explicitly empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedRecord {
    fields: BTreeMap<MetadataField, ResolvedField>,
}

impl MergedRecord {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn get(&self, field: MetadataField) -> Option<&ResolvedField> {
        self.fields.get(&field)
    }

    pub fn value(&self, field: MetadataField) -> Option<&str> {
        self.fields.get(&field).map(|resolved| resolved.value.as_str())
    }

    pub fn provenance(&self, field: MetadataField) -> Option<ProviderId> {
        self.fields.get(&field).map(|resolved| resolved.provenance)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetadataField, &ResolvedField)> {
        self.fields.iter().map(|(field, resolved)| (*field, resolved))
    }
}

/// Merges the best candidate from each provider into one record.
///
/// Per field, providers are consulted in [`ProviderId::priority`] order; the
/// first non-empty value wins and is recorded as provenance. Fields already
/// non-empty in `existing` are skipped entirely (gap-fill only), and fields
/// no provider can fill are omitted.
pub fn merge(
    existing: &BTreeMap<MetadataField, String>,
    scored: &[ScoredCandidate],
) -> MergedRecord {
    let mut by_priority: Vec<&ScoredCandidate> = scored.iter().collect();
    by_priority.sort_by_key(|candidate| candidate.provider().priority());

    let mut record = MergedRecord::default();

    for field in MetadataField::ALL {
        if existing
            .get(&field)
            .is_some_and(|value| !value.trim().is_empty())
        {
            continue;
        }

        for candidate in &by_priority {
            let Some(value) = candidate.candidate.fields.get(&field) else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }

            record.fields.insert(
                field,
                ResolvedField {
                    value: value.to_string(),
                    provenance: candidate.provider(),
                },
            );
            break;
        }
    }

    record
}
