use crate::config::RerankConfig;
use crate::reranking::{match_fraction, sort_ranked, term_set};
use crate::types::{CandidateRecord, Classification, RankedCandidate};

const PURCHASE_TERMS: &[&str] = &["buy", "purchas", "order", "pay", "get", "want"];
const CHECKOUT_TERMS: &[&str] = &["checkout", "cart", "payment", "ship", "deliveri", "card"];

/// Minimum number of previous-answer terms a QA exemplar must repeat to count
/// as continuing the conversation.
const CONTINUITY_MIN_SHARED: usize = 2;

/// Reranks curated question/answer exemplars.
#[derive(Debug, Clone)]
pub struct QaLaneReranker {
    config: RerankConfig,
}

impl QaLaneReranker {
    pub fn new(config: RerankConfig) -> Self {
        Self { config }
    }

    /// `query` is the enhanced query (utterance plus recent turns).
    pub fn rerank(
        &self,
        candidates: Vec<CandidateRecord>,
        classification: &Classification,
        query: &str,
        last_answer: Option<&str>,
        top_n: usize,
    ) -> Vec<RankedCandidate> {
        let query_terms: Vec<String> = term_set(query).into_iter().collect();
        let answer_terms = last_answer.map(term_set).unwrap_or_default();
        let purchase_intent = query_terms
            .iter()
            .any(|t| PURCHASE_TERMS.contains(&t.as_str()));

        let mut ranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .map(|record| {
                let record = Self::with_current_metadata(record, classification);
                let candidate_terms = term_set(&format!("{} {}", record.title, record.text));
                let cfg = &self.config;

                let mut score = record.score;
                score *= 1.0 + match_fraction(&record, classification) * cfg.qa_metadata_weight;

                let overlap = if query_terms.is_empty() {
                    0.0
                } else {
                    query_terms
                        .iter()
                        .filter(|t| candidate_terms.contains(*t))
                        .count() as f32
                        / query_terms.len() as f32
                };
                score *= 1.0 + overlap * cfg.qa_overlap_weight;

                if purchase_intent
                    && CHECKOUT_TERMS
                        .iter()
                        .any(|t| candidate_terms.contains(*t))
                {
                    score *= cfg.purchase_checkout_boost;
                }

                let recurring = answer_terms
                    .iter()
                    .filter(|t| candidate_terms.contains(*t))
                    .count();
                if recurring >= CONTINUITY_MIN_SHARED {
                    score *= cfg.qa_continuity_boost;
                }

                RankedCandidate {
                    record,
                    rerank_score: score.min(cfg.qa_score_ceiling),
                }
            })
            .collect();

        sort_ranked(&mut ranked);
        ranked.truncate(top_n);

        if let Some(top) = ranked.first() {
            tracing::debug!(
                top_id = %top.record.id,
                top_score = top.rerank_score,
                count = ranked.len(),
                "QA lane reranked"
            );
        }
        ranked
    }

    /// Exemplar metadata is measured against the current request, not what was
    /// stored at index time.
    fn with_current_metadata(
        mut record: CandidateRecord,
        classification: &Classification,
    ) -> CandidateRecord {
        record.content_type = Some(classification.content_type);
        record.category = Some(classification.category.clone());
        record.sub_category = Some(classification.sub_category.clone());
        record
    }
}
