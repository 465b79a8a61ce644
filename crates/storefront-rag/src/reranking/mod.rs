//! Lane-specific rerankers applied after hybrid retrieval.
//!
//! Both lanes multiply the index similarity by a set of boosts and then sort
//! with the same deterministic ordering: rerank score, then base similarity,
//! then record id.

pub mod main_lane;
pub mod qa_lane;

pub use main_lane::MainLaneReranker;
pub use qa_lane::QaLaneReranker;

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::search::LexicalScorer;
use crate::types::{CandidateRecord, Classification, RankedCandidate};

/// How many of {type, category, sub_category} agree between a candidate's
/// stored metadata and the classification, as a fraction of three.
pub fn match_fraction(record: &CandidateRecord, classification: &Classification) -> f32 {
    let mut matches = 0u8;
    let record_type = record.content_type.or_else(|| record.kind.content_type());
    if record_type == Some(classification.content_type) {
        matches += 1;
    }
    if same_label(record.category.as_deref(), &classification.category) {
        matches += 1;
    }
    if same_label(record.sub_category.as_deref(), &classification.sub_category) {
        matches += 1;
    }
    matches as f32 / 3.0
}

fn same_label(stored: Option<&str>, classified: &str) -> bool {
    match stored {
        Some(s) => !s.trim().is_empty() && s.trim().eq_ignore_ascii_case(classified.trim()),
        None => false,
    }
}

/// Lowercase alphanumeric words joined by single spaces, padded for
/// whole-phrase containment checks.
pub(crate) fn normalize_phrase(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    format!(" {} ", words.join(" "))
}

/// Whether `needle` occurs in `haystack` as a whole phrase, ignoring case and
/// punctuation.
pub(crate) fn contains_phrase(haystack: &str, needle: &str) -> bool {
    let needle = normalize_phrase(needle);
    if needle.trim().is_empty() {
        return false;
    }
    normalize_phrase(haystack).contains(&needle)
}

/// Stemmed, stop-word free terms of `text` as a set.
pub(crate) fn term_set(text: &str) -> HashSet<String> {
    LexicalScorer::analyze(text).into_iter().collect()
}

/// Sort descending by rerank score, ties by base similarity, then id.
pub fn sort_ranked(ranked: &mut [RankedCandidate]) {
    ranked.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.record
                    .score
                    .partial_cmp(&a.record.score)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
}
