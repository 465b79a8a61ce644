//! Two-lane hybrid retrieval.
//!
//! The main lane searches general store content, the QA lane searches curated
//! question/answer exemplars. Lanes run concurrently and are reranked
//! independently. Inside each query, dense embedding and lexical scoring also
//! run concurrently.

use futures::future::try_join_all;
use std::sync::Arc;

use crate::config::{AssistConfig, RetrievalConfig};
use crate::embeddings::EmbeddingService;
use crate::error::ServiceError;
use crate::rag::url_resolver::AvailableContent;
use crate::reranking::{MainLaneReranker, QaLaneReranker};
use crate::search::{merge_deduplicated, LexicalScorer, ScoreMode};
use crate::storage::VectorIndex;
use crate::types::{
    CandidateRecord, Classification, ContentType, ConversationContext, RankedCandidate,
};

#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub main_results: Vec<RankedCandidate>,
    pub qa_results: Vec<RankedCandidate>,
    /// Every deduplicated main-lane candidate, before truncation. Redirect
    /// targets are verified against this.
    pub available: AvailableContent,
}

pub struct HybridRetriever {
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    lexical: LexicalScorer,
    config: RetrievalConfig,
    main_reranker: MainLaneReranker,
    qa_reranker: QaLaneReranker,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        lexical: LexicalScorer,
        config: &AssistConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            lexical,
            config: config.retrieval.clone(),
            main_reranker: MainLaneReranker::new(config.rerank.clone()),
            qa_reranker: QaLaneReranker::new(config.rerank.clone()),
        }
    }

    /// Run both lanes. A lane whose collaborator fails degrades to empty
    /// results; an unreachable collaborator fails the call.
    pub async fn retrieve(
        &self,
        utterance: &str,
        classification: &Classification,
        context: &ConversationContext,
    ) -> Result<RetrievalOutcome, ServiceError> {
        let last_answer = context.last_answer_text();

        let (main, qa) = tokio::join!(
            self.main_lane(utterance, classification, last_answer),
            self.qa_lane(utterance, classification, context, last_answer),
        );

        let (main_results, candidates) = match main {
            Ok(lane) => lane,
            Err(e) if !e.is_unavailable() => {
                tracing::warn!(error = %e, "Main lane failed, continuing without content results");
                (Vec::new(), Vec::new())
            }
            Err(e) => return Err(e),
        };
        let qa_results = match qa {
            Ok(lane) => lane,
            Err(e) if !e.is_unavailable() => {
                tracing::warn!(error = %e, "QA lane failed, continuing without exemplars");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            main = main_results.len(),
            qa = qa_results.len(),
            available = candidates.len(),
            top_main = main_results.first().map(|r| r.rerank_score).unwrap_or(0.0),
            top_qa = qa_results.first().map(|r| r.rerank_score).unwrap_or(0.0),
            "Retrieval complete"
        );

        Ok(RetrievalOutcome {
            main_results,
            qa_results,
            available: AvailableContent::new(candidates),
        })
    }

    async fn main_lane(
        &self,
        utterance: &str,
        classification: &Classification,
        last_answer: Option<&str>,
    ) -> Result<(Vec<RankedCandidate>, Vec<CandidateRecord>), ServiceError> {
        let mut queries = vec![utterance.to_string()];
        if classification.content_type == ContentType::Collection {
            queries.push(format!("{} {}", utterance, classification.content_type));
        }

        let result_sets = try_join_all(queries.iter().map(|q| {
            self.query_namespace(&self.config.content_namespace, q, self.config.main_candidates)
        }))
        .await?;

        let merged = merge_deduplicated(result_sets);
        tracing::debug!(queries = queries.len(), candidates = merged.len(), "Main lane candidates");

        let ranked = self.main_reranker.rerank(
            merged.clone(),
            classification,
            utterance,
            last_answer,
            self.config.main_top_n,
        );
        Ok((ranked, merged))
    }

    async fn qa_lane(
        &self,
        utterance: &str,
        classification: &Classification,
        context: &ConversationContext,
        last_answer: Option<&str>,
    ) -> Result<Vec<RankedCandidate>, ServiceError> {
        let query = enhanced_query(utterance, context, self.config.history_turns_for_qa);
        let candidates = self
            .query_namespace(&self.config.qa_namespace, &query, self.config.qa_candidates)
            .await?;
        tracing::debug!(candidates = candidates.len(), "QA lane candidates");

        Ok(self.qa_reranker.rerank(
            candidates,
            classification,
            &query,
            last_answer,
            self.config.qa_top_n,
        ))
    }

    async fn query_namespace(
        &self,
        namespace: &str,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<CandidateRecord>, ServiceError> {
        let (dense, sparse) = tokio::join!(
            self.embedder.embed_checked(text),
            self.lexical.score_async(text, ScoreMode::Query),
        );
        let dense = dense?;
        self.index.query(namespace, &dense, &sparse, top_k, None).await
    }
}

/// The utterance followed by the contents of the last `turns` prior turns.
pub fn enhanced_query(utterance: &str, context: &ConversationContext, turns: usize) -> String {
    let mut query = utterance.to_string();
    for turn in context.recent(turns) {
        let content = turn.content.trim();
        if !content.is_empty() {
            query.push(' ');
            query.push_str(content);
        }
    }
    query
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::testing::HashingEmbedder;
    use crate::search::text_stats::testing::CountingBackend;
    use crate::storage::{InMemoryVectorIndex, RecordMetadata, VectorRecord};
    use crate::types::{Action, ContextDependency, MetadataFilter, RecordKind, SparseVector, Turn};
    use crate::reranking::testing::candidate;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records each queried namespace. Content queries return overlapping
    /// handles with different scores, QA queries return nothing.
    #[derive(Default)]
    struct RecordingIndex {
        queries: Mutex<Vec<String>>,
    }

    impl RecordingIndex {
        fn count(&self, namespace: &str) -> usize {
            self.queries.lock().iter().filter(|n| n.as_str() == namespace).count()
        }
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn upsert(&self, _namespace: &str, _record: VectorRecord) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn query(
            &self,
            namespace: &str,
            _dense: &[f32],
            _sparse: &SparseVector,
            _top_k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<CandidateRecord>, ServiceError> {
            let previous = {
                let mut queries = self.queries.lock();
                let previous = queries.iter().filter(|n| n.as_str() == namespace).count();
                queries.push(namespace.to_string());
                previous
            };
            if namespace != "content" {
                return Ok(Vec::new());
            }
            Ok(if previous == 0 {
                vec![
                    candidate("1", RecordKind::Product, "wool-scarf", "Wool Scarf", 0.4),
                    candidate("2", RecordKind::Product, "linen-shirt", "Linen Shirt", 0.6),
                ]
            } else {
                vec![
                    candidate("3", RecordKind::Product, "wool-scarf", "Wool Scarf", 0.9),
                    candidate("4", RecordKind::Product, "alpine-parka", "Alpine Parka", 0.5),
                ]
            })
        }

        async fn delete_all(&self, _namespace: &str) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    struct FailingIndex {
        unavailable: bool,
    }

    #[async_trait]
    impl VectorIndex for FailingIndex {
        async fn upsert(&self, _namespace: &str, _record: VectorRecord) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn query(
            &self,
            _namespace: &str,
            _dense: &[f32],
            _sparse: &SparseVector,
            _top_k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> Result<Vec<CandidateRecord>, ServiceError> {
            if self.unavailable {
                Err(ServiceError::unavailable("vector-index", "connection reset"))
            } else {
                Err(ServiceError::failed("vector-index", "namespace missing"))
            }
        }

        async fn delete_all(&self, _namespace: &str) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    fn lexical() -> LexicalScorer {
        LexicalScorer::with_backend(Default::default(), Arc::new(CountingBackend))
    }

    async fn seed(index: &InMemoryVectorIndex, namespace: &str, id: &str, kind: RecordKind, title: &str, text: &str) {
        let embedder = HashingEmbedder::default();
        let body = format!("{} {}", title, text);
        index
            .upsert(
                namespace,
                VectorRecord {
                    id: id.to_string(),
                    dense: embedder.embed(&body).await.unwrap(),
                    sparse: lexical().score_document(&body),
                    metadata: RecordMetadata {
                        kind,
                        handle: Some(id.to_string()),
                        title: title.to_string(),
                        text: text.to_string(),
                        blog_handle: None,
                        content_type: kind.content_type(),
                        category: None,
                        sub_category: None,
                    },
                },
            )
            .await
            .unwrap();
    }

    fn classification(content_type: ContentType) -> Classification {
        Classification {
            content_type,
            category: "apparel".into(),
            sub_category: "winter".into(),
            action_intent: Action::None,
            context_dependency: ContextDependency::Low,
            content_targets: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_both_lanes_return_top_slices() {
        let index = Arc::new(InMemoryVectorIndex::new(0.7));
        seed(&index, "content", "winter-sports-collection", RecordKind::Collection, "Winter Sports", "Skis, boards and winter gear").await;
        seed(&index, "content", "alpine-parka", RecordKind::Product, "Alpine Parka", "Insulated winter parka").await;
        seed(&index, "content", "linen-shirt", RecordKind::Product, "Linen Shirt", "Light summer shirt").await;
        seed(&index, "content", "about-us", RecordKind::Page, "About us", "Our story").await;
        seed(&index, "qa", "qa-1", RecordKind::Qa, "Do you ship winter gear abroad?", "Yes, we ship worldwide.").await;
        seed(&index, "qa", "qa-2", RecordKind::Qa, "What payment methods do you take?", "All major cards.").await;
        seed(&index, "qa", "qa-3", RecordKind::Qa, "How do I care for wool?", "Hand wash cold.").await;
        seed(&index, "qa", "qa-4", RecordKind::Qa, "Are gift cards available?", "Yes, in any amount.").await;

        let retriever = HybridRetriever::new(
            Arc::new(HashingEmbedder::default()),
            index,
            lexical(),
            &AssistConfig::default(),
        );
        let outcome = retriever
            .retrieve(
                "do you have winter gear",
                &classification(ContentType::Collection),
                &ConversationContext::default(),
            )
            .await
            .unwrap();

        assert!(outcome.main_results.len() <= 2);
        assert_eq!(outcome.qa_results.len(), 3);
        assert_eq!(outcome.main_results[0].record.id, "winter-sports-collection");
        assert_eq!(outcome.available.records().len(), 4);
    }

    #[tokio::test]
    async fn test_collection_turn_runs_second_query_and_merges() {
        let index = Arc::new(RecordingIndex::default());
        let retriever = HybridRetriever::new(
            Arc::new(HashingEmbedder::default()),
            index.clone(),
            lexical(),
            &AssistConfig::default(),
        );
        let outcome = retriever
            .retrieve(
                "warm scarves",
                &classification(ContentType::Collection),
                &ConversationContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(index.count("content"), 2);
        assert_eq!(index.count("qa"), 1);

        let available = outcome.available.records();
        assert_eq!(available.len(), 3);
        let scarves: Vec<_> = available
            .iter()
            .filter(|r| r.handle.as_deref() == Some("wool-scarf"))
            .collect();
        assert_eq!(scarves.len(), 1);
        assert_eq!(scarves[0].id, "3");
    }

    #[tokio::test]
    async fn test_product_turn_runs_single_content_query() {
        let index = Arc::new(RecordingIndex::default());
        let retriever = HybridRetriever::new(
            Arc::new(HashingEmbedder::default()),
            index.clone(),
            lexical(),
            &AssistConfig::default(),
        );
        let outcome = retriever
            .retrieve("wool scarf", &classification(ContentType::Product), &ConversationContext::default())
            .await
            .unwrap();

        assert_eq!(index.count("content"), 1);
        assert_eq!(outcome.available.records().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_index_degrades_lanes() {
        let retriever = HybridRetriever::new(
            Arc::new(HashingEmbedder::default()),
            Arc::new(FailingIndex { unavailable: false }),
            lexical(),
            &AssistConfig::default(),
        );
        let outcome = retriever
            .retrieve("hats", &classification(ContentType::Product), &ConversationContext::default())
            .await
            .unwrap();
        assert!(outcome.main_results.is_empty());
        assert!(outcome.qa_results.is_empty());
        assert!(outcome.available.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_index_fails_retrieval() {
        let retriever = HybridRetriever::new(
            Arc::new(HashingEmbedder::default()),
            Arc::new(FailingIndex { unavailable: true }),
            lexical(),
            &AssistConfig::default(),
        );
        let err = retriever
            .retrieve("hats", &classification(ContentType::Product), &ConversationContext::default())
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_enhanced_query_uses_recent_turns() {
        let context = ConversationContext {
            turns: vec![
                Turn::user("first"),
                Turn::assistant("second", Action::None),
                Turn::user("third"),
            ],
            last_answer: None,
        };
        assert_eq!(enhanced_query("now", &context, 2), "now second third");
    }
}
