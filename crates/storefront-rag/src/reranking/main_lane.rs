use crate::config::RerankConfig;
use crate::reranking::{contains_phrase, match_fraction, sort_ranked, term_set};
use crate::types::{CandidateRecord, Classification, ContentType, RankedCandidate, RecordKind};

/// Reranks general-content candidates (products, collections, posts, pages,
/// discounts).
#[derive(Debug, Clone)]
pub struct MainLaneReranker {
    config: RerankConfig,
}

impl MainLaneReranker {
    pub fn new(config: RerankConfig) -> Self {
        Self { config }
    }

    pub fn rerank(
        &self,
        candidates: Vec<CandidateRecord>,
        classification: &Classification,
        utterance: &str,
        last_answer: Option<&str>,
        top_n: usize,
    ) -> Vec<RankedCandidate> {
        let mut ranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .map(|record| {
                let rerank_score = self.score(&record, classification, utterance, last_answer);
                RankedCandidate {
                    record,
                    rerank_score,
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
                "Main lane reranked"
            );
        }
        ranked
    }

    pub fn score(
        &self,
        record: &CandidateRecord,
        classification: &Classification,
        utterance: &str,
        last_answer: Option<&str>,
    ) -> f32 {
        let cfg = &self.config;
        let mut score = record.score;

        let record_type = record.content_type.or_else(|| record.kind.content_type());
        if record_type == Some(classification.content_type) {
            score *= if classification.content_type == ContentType::Collection {
                cfg.collection_match_boost
            } else {
                cfg.type_match_boost
            };
        }

        score *= 1.0 + match_fraction(record, classification) / 3.0 * cfg.metadata_match_weight;

        if record.kind == RecordKind::Product {
            score *= self.name_boost(&record.title, utterance);
        }

        if let Some(answer) = last_answer {
            score *= self.continuity_boost(record, answer);
        }

        score
    }

    fn name_boost(&self, title: &str, utterance: &str) -> f32 {
        if title.trim().is_empty() {
            return 1.0;
        }
        if contains_phrase(utterance, title) {
            return self.config.exact_name_boost;
        }
        let title_terms = term_set(title);
        let utterance_terms = term_set(utterance);
        if title_terms.iter().any(|t| t.len() > 2 && utterance_terms.contains(t)) {
            self.config.partial_name_boost
        } else {
            1.0
        }
    }

    /// Boost items the previous answer already talked about.
    fn continuity_boost(&self, record: &CandidateRecord, last_answer: &str) -> f32 {
        if !record.title.trim().is_empty() && contains_phrase(last_answer, &record.title) {
            return self.config.continuity_exact_boost;
        }
        let Some(handle) = record.handle.as_deref() else {
            return 1.0;
        };
        let handle_terms = term_set(&handle.replace('-', " "));
        if handle_terms.is_empty() {
            return 1.0;
        }
        let answer_terms = term_set(last_answer);
        let shared = handle_terms.iter().filter(|t| answer_terms.contains(*t)).count();
        // Single-word handles need their one word; longer handles need two.
        if shared >= handle_terms.len().min(2) {
            self.config.continuity_partial_boost
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reranking::testing::{candidate, classification};

    fn reranker() -> MainLaneReranker {
        MainLaneReranker::new(RerankConfig::default())
    }

    #[test]
    fn test_type_match_ranks_strictly_higher() {
        let class = classification(ContentType::Product);
        let matching = candidate("p1", RecordKind::Product, "trail-shoe", "Trail Shoe", 0.5);
        let other = candidate("g1", RecordKind::Page, "about-us", "About us", 0.5);

        let ranked = reranker().rerank(vec![other, matching], &class, "anything good", None, 2);
        assert_eq!(ranked[0].record.id, "p1");
        assert!(ranked[0].rerank_score > ranked[1].rerank_score);
    }

    #[test]
    fn test_collection_match_uses_larger_boost() {
        let class = classification(ContentType::Collection);
        let collection = candidate("c1", RecordKind::Collection, "winter", "Winter", 0.1);
        let product = candidate("p1", RecordKind::Product, "boot", "Boot", 0.1);

        let r = reranker();
        let c = r.score(&collection, &class, "winter stuff", None);
        let p = r.score(&product, &class, "winter stuff", None);
        // 0.1 * 30 * (1 + 1/3 * 2 / 3)
        assert!((c - 0.1 * 30.0 * (1.0 + (1.0 / 3.0) / 3.0 * 2.0)).abs() < 1e-4);
        assert!(c > p);
    }

    #[test]
    fn test_exact_product_name_beats_partial() {
        let class = classification(ContentType::Product);
        let exact = candidate("1", RecordKind::Product, "alpine-parka", "Alpine Parka", 0.2);
        let partial = candidate("2", RecordKind::Product, "alpine-hat", "Alpine Hat", 0.2);
        let none = candidate("3", RecordKind::Product, "linen-shirt", "Linen Shirt", 0.2);

        let r = reranker();
        let utterance = "how warm is the alpine parka";
        let e = r.score(&exact, &class, utterance, None);
        let p = r.score(&partial, &class, utterance, None);
        let n = r.score(&none, &class, utterance, None);
        assert!((e / n - 100.0).abs() < 1e-2);
        assert!((p / n - 10.0).abs() < 1e-2);
    }

    #[test]
    fn test_previous_answer_continuity() {
        let class = classification(ContentType::Product);
        let mentioned = candidate("1", RecordKind::Product, "storm-shell", "Storm Shell", 0.3);
        let fresh = candidate("2", RecordKind::Product, "city-coat", "City Coat", 0.3);

        let ranked = reranker().rerank(
            vec![fresh, mentioned],
            &class,
            "what sizes does it come in",
            Some("The Storm Shell is our lightest waterproof jacket."),
            2,
        );
        assert_eq!(ranked[0].record.id, "1");
        assert!((ranked[0].rerank_score / ranked[1].rerank_score - 50.0).abs() < 1e-2);
    }

    #[test]
    fn test_truncates_to_top_n() {
        let class = classification(ContentType::Page);
        let candidates = (0..5)
            .map(|i| candidate(&format!("p{}", i), RecordKind::Page, &format!("page-{}", i), "", 0.1 * i as f32))
            .collect();
        let ranked = reranker().rerank(candidates, &class, "info", None, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].record.id, "p4");
    }
}
