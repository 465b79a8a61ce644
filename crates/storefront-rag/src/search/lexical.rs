//! BM25-style sparse vectors for hybrid retrieval.
//!
//! Each scored text is treated as its own one-document corpus, so `idf` is a
//! smoothed constant and term weight is driven by term frequency and length
//! normalisation. Scores are only meaningful relative to other terms of the
//! same call.

use std::collections::HashSet;
use std::sync::Arc;
use tantivy::tokenizer::{
    Language, LowerCaser, RemoveLongFilter, SimpleTokenizer, Stemmer, StopWordFilter,
    TextAnalyzer, TokenStream,
};

use crate::config::LexicalConfig;
use crate::search::text_stats::{TantivyTermStatistics, TermStatistics};
use crate::types::SparseVector;

const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "any", "are", "as", "at", "be", "been", "but", "by", "can",
    "could", "do", "does", "for", "from", "had", "has", "have", "how", "i", "if", "in", "into",
    "is", "it", "its", "me", "my", "of", "on", "or", "our", "please", "so", "some", "that",
    "the", "their", "them", "then", "there", "these", "they", "this", "those", "to", "us", "was",
    "we", "were", "what", "when", "where", "which", "who", "why", "will", "with", "would", "you",
    "your",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreMode {
    /// Query-time scoring, capped at `query_max_terms`
    Query,
    /// Index-time scoring, capped at `index_max_terms`
    Index,
}

#[derive(Clone)]
pub struct LexicalScorer {
    stats: Arc<dyn TermStatistics>,
    config: LexicalConfig,
}

impl LexicalScorer {
    /// Scorer backed by per-call scratch Tantivy indexes under `config.scratch_dir`.
    pub fn new(config: LexicalConfig) -> Self {
        let stats = Arc::new(TantivyTermStatistics::new(config.scratch_dir.clone()));
        Self { stats, config }
    }

    pub fn with_backend(config: LexicalConfig, stats: Arc<dyn TermStatistics>) -> Self {
        Self { stats, config }
    }

    pub fn config(&self) -> &LexicalConfig {
        &self.config
    }

    fn analyzer() -> TextAnalyzer {
        TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(RemoveLongFilter::limit(40))
            .filter(LowerCaser)
            .filter(StopWordFilter::remove(STOP_WORDS.iter().map(|w| w.to_string())))
            .filter(Stemmer::new(Language::English))
            .build()
    }

    /// Lowercased, stop-word filtered, stemmed unigrams.
    pub fn analyze(text: &str) -> Vec<String> {
        let mut analyzer = Self::analyzer();
        let mut stream = analyzer.token_stream(text);
        let mut terms = Vec::new();
        while stream.advance() {
            terms.push(stream.token().text.clone());
        }
        terms
    }

    /// Unigrams plus adjacent-pair bigrams when enabled.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut terms = Self::analyze(text);
        if self.config.enable_bigrams && terms.len() > 1 {
            let bigrams: Vec<String> = terms
                .windows(2)
                .map(|pair| format!("{}_{}", pair[0], pair[1]))
                .collect();
            terms.extend(bigrams);
        }
        terms
    }

    pub fn score(&self, text: &str) -> SparseVector {
        self.score_with_mode(text, ScoreMode::Query)
    }

    pub fn score_document(&self, text: &str) -> SparseVector {
        self.score_with_mode(text, ScoreMode::Index)
    }

    pub fn score_with_mode(&self, text: &str, mode: ScoreMode) -> SparseVector {
        let terms = self.tokenize(text);
        if terms.is_empty() {
            return SparseVector::degenerate();
        }

        let stats = match self.stats.collect(&terms) {
            Ok(stats) if !stats.terms.is_empty() => stats,
            Ok(_) => return SparseVector::degenerate(),
            Err(e) => {
                tracing::warn!(error = %e, "Lexical statistics unavailable, using degenerate sparse vector");
                return SparseVector::degenerate();
            }
        };

        let k1 = self.config.k1;
        let b = self.config.b;
        let n = stats.num_docs.max(1) as f32;
        let doc_len = stats.doc_len.max(1) as f32;
        let avg_doc_len = if stats.avg_doc_len > 0.0 {
            stats.avg_doc_len
        } else {
            doc_len
        };
        let length_norm = 1.0 - b + b * (doc_len / avg_doc_len);

        let mut scored: Vec<(String, f32)> = stats
            .terms
            .iter()
            .map(|t| {
                let df = t.doc_freq as f32;
                let idf = ((n - df + 0.5) / (df + 0.5)).ln_1p();
                let tf = t.term_freq as f32;
                let weight = idf * tf * (k1 + 1.0) / (tf + k1 * length_norm);
                (t.term.clone(), weight)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let limit = match mode {
            ScoreMode::Query => self.config.query_max_terms,
            ScoreMode::Index => self.config.index_max_terms,
        };
        scored.truncate(limit);

        let max = scored.iter().map(|(_, s)| *s).fold(f32::MIN, f32::max);
        let min = scored.iter().map(|(_, s)| *s).fold(f32::MAX, f32::min);
        let range = max - min;

        let mut vector = SparseVector::default();
        let mut seen = HashSet::with_capacity(scored.len());
        for (term, score) in scored {
            let index = term_index(&term);
            // Hash collisions keep the higher-weighted term, which came first.
            if !seen.insert(index) {
                continue;
            }
            let normalized = if range.abs() < 1e-9 {
                1.0
            } else {
                (score - min) / range
            };
            vector.indices.push(index);
            vector.values.push(normalized);
        }
        vector
    }

    /// Runs `score_with_mode` on the blocking pool.
    pub async fn score_async(&self, text: &str, mode: ScoreMode) -> SparseVector {
        let scorer = self.clone();
        let text = text.to_string();
        match tokio::task::spawn_blocking(move || scorer.score_with_mode(&text, mode)).await {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(error = %e, "Lexical scoring task failed");
                SparseVector::degenerate()
            }
        }
    }
}

/// FNV-1a over the term bytes. Index 0 is reserved for the degenerate vector.
pub fn term_index(term: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in term.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash.max(1)
}
