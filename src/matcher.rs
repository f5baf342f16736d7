//! Title normalization, similarity scoring, and best-candidate selection.
//!
//! Scores are a pure function of the two normalized strings, so the same
//! query/candidate pair always produces the same score regardless of which
//! worker computes it.

use crate::providers::{ProviderId, RawCandidate};
use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use strsim::jaro_winkler;

/// Tokens that carry no identity: edition and binding markers that providers
/// append to otherwise identical titles.
static NOISE_TOKENS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        "unabridged",
        "abridged",
        "hardcover",
        "paperback",
        "reprint",
        "edition",
        "ed",
        "annotated",
        "illustrated",
        "vol",
        "volume",
    ]
    .into_iter()
    .collect()
});

/// A candidate together with its computed match score and the normalization
/// trace that produced it.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: RawCandidate,
    pub score: f64,
    pub normalized_query: String,
    pub normalized_title: String,
}

impl ScoredCandidate {
    pub fn provider(&self) -> ProviderId {
        self.candidate.provider
    }
}

/// Lowercases, drops parenthetical/bracketed segments, strips punctuation,
/// removes noise tokens, and collapses whitespace.
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut depth = 0usize;

    for ch in title.chars() {
        match ch {
            '(' | '[' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            _ if ch.is_alphanumeric() => {
                for lower in ch.to_lowercase() {
                    out.push(lower);
                }
            }
            _ => out.push(' '),
        }
    }

    let mut normalized = String::with_capacity(out.len());
    for token in out.split_whitespace() {
        if NOISE_TOKENS.contains(token) {
            continue;
        }
        if !normalized.is_empty() {
            normalized.push(' ');
        }
        normalized.push_str(token);
    }
    normalized
}

/// Similarity between two normalized titles in `[0, 1]`.
///
/// Takes the better of Jaro-Winkler (catches near-identical strings with
/// small edits) and token-set Jaccard overlap (catches reordered titles like
/// "Gatsby, The Great"). Equal normalized strings score exactly 1.0.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let edit = jaro_winkler(a, b);

    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();
    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    let overlap = if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    };

    edit.max(overlap)
}

/// Scores every candidate against the query title and returns the best one
/// clearing `threshold`, or `None` when nothing does.
///
/// A score exactly at the threshold is accepted. Ties break by the
/// provider-declared rank, then by first-seen order (the iteration below is
/// stable because replacement requires a strictly better key).
pub fn best_match(
    query_title: &str,
    candidates: Vec<RawCandidate>,
    threshold: f64,
) -> Option<ScoredCandidate> {
    let normalized_query = normalize_title(query_title);
    let mut best: Option<ScoredCandidate> = None;

    for candidate in candidates {
        let normalized_title = normalize_title(&candidate.title);
        let score = title_similarity(&normalized_query, &normalized_title);

        if score < threshold {
            tracing::trace!(
                provider = %candidate.provider,
                title = %candidate.title,
                score,
                threshold,
                "candidate below match threshold"
            );
            continue;
        }

        let better = match &best {
            None => true,
            Some(current) => {
                score > current.score
                    || (score == current.score && candidate.rank < current.candidate.rank)
            }
        };

        if better {
            best = Some(ScoredCandidate {
                candidate,
                score,
                normalized_query: normalized_query.clone(),
                normalized_title,
            });
        }
    }

    if let Some(scored) = &best {
        tracing::debug!(
            provider = %scored.provider(),
            score = scored.score,
            title = %scored.candidate.title,
            "selected best candidate"
        );
    }

    best
}
