//! Index-time ingestion of store content and QA exemplars.
//!
//! Each item is embedded through the dense collaborator and lexically scored
//! in index mode. Lexical scoring of a batch is CPU-bound and runs on the
//! rayon pool; embedding and upserts go through the async collaborators.

use futures::future::join_all;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::config::RetrievalConfig;
use crate::embeddings::EmbeddingService;
use crate::error::ServiceError;
use crate::search::LexicalScorer;
use crate::storage::{RecordMetadata, VectorIndex, VectorRecord};
use crate::types::{ContentType, RecordKind, SparseVector};

// ── Types ──────────────────────────────────────────────────────────────────

/// A product, collection, post, page or discount to make searchable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub handle: Option<String>,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub blog_handle: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sub_category: Option<String>,
}

/// A curated question and its approved answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaPair {
    pub id: String,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sub_category: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexingReport {
    pub namespace: String,
    pub indexed: usize,
    pub failed: Vec<String>,
    pub duration_ms: u64,
}

struct PendingRecord {
    id: String,
    text: String,
    metadata: RecordMetadata,
}

// ── Indexer ────────────────────────────────────────────────────────────────

pub struct ContentIndexer {
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    lexical: LexicalScorer,
    content_namespace: String,
    qa_namespace: String,
}

impl ContentIndexer {
    pub fn new(
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        lexical: LexicalScorer,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            lexical,
            content_namespace: config.content_namespace.clone(),
            qa_namespace: config.qa_namespace.clone(),
        }
    }

    pub async fn index_content(&self, items: Vec<ContentItem>) -> Result<IndexingReport, ServiceError> {
        let pending = items
            .into_iter()
            .map(|item| PendingRecord {
                text: format!("{}\n{}", item.title, item.body),
                metadata: RecordMetadata {
                    kind: RecordKind::from(item.content_type),
                    handle: item.handle,
                    title: item.title,
                    text: item.body,
                    blog_handle: item.blog_handle,
                    content_type: Some(item.content_type),
                    category: item.category,
                    sub_category: item.sub_category,
                },
                id: item.id,
            })
            .collect();
        self.index_records(&self.content_namespace, pending).await
    }

    pub async fn index_qa(&self, pairs: Vec<QaPair>) -> Result<IndexingReport, ServiceError> {
        let pending = pairs
            .into_iter()
            .map(|pair| PendingRecord {
                text: format!("{}\n{}", pair.question, pair.answer),
                metadata: RecordMetadata {
                    kind: RecordKind::Qa,
                    handle: None,
                    title: pair.question,
                    text: pair.answer,
                    blog_handle: None,
                    content_type: pair.content_type,
                    category: pair.category,
                    sub_category: pair.sub_category,
                },
                id: pair.id,
            })
            .collect();
        self.index_records(&self.qa_namespace, pending).await
    }

    pub async fn reset(&self, namespace: &str) -> Result<(), ServiceError> {
        self.index.delete_all(namespace).await?;
        tracing::info!(namespace = namespace, "Namespace cleared");
        Ok(())
    }

    async fn index_records(
        &self,
        namespace: &str,
        records: Vec<PendingRecord>,
    ) -> Result<IndexingReport, ServiceError> {
        let start = Instant::now();
        let mut report = IndexingReport {
            namespace: namespace.to_string(),
            ..Default::default()
        };

        let (valid, invalid): (Vec<_>, Vec<_>) = records
            .into_iter()
            .partition(|r| !r.id.trim().is_empty() && !r.text.trim().is_empty());
        if !invalid.is_empty() {
            tracing::warn!(count = invalid.len(), "Skipping records without id or text");
            report
                .failed
                .extend(invalid.into_iter().map(|r| r.id));
        }

        let sparse_vectors = self.score_batch(valid.iter().map(|r| r.text.clone()).collect()).await;
        let embeddings = join_all(valid.iter().map(|r| self.embedder.embed_checked(&r.text))).await;

        for ((record, sparse), dense) in valid.into_iter().zip(sparse_vectors).zip(embeddings) {
            let dense = match dense {
                Ok(vector) => vector,
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    tracing::warn!(id = %record.id, error = %e, "Embedding failed, skipping record");
                    report.failed.push(record.id);
                    continue;
                }
            };

            let id = record.id.clone();
            let upsert = self
                .index
                .upsert(
                    namespace,
                    VectorRecord {
                        id: record.id,
                        dense,
                        sparse,
                        metadata: record.metadata,
                    },
                )
                .await;
            match upsert {
                Ok(()) => report.indexed += 1,
                Err(e) if e.is_unavailable() => return Err(e),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Upsert failed, skipping record");
                    report.failed.push(id);
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            namespace = namespace,
            indexed = report.indexed,
            failed = report.failed.len(),
            duration_ms = report.duration_ms,
            "Indexing batch complete"
        );
        Ok(report)
    }

    /// Index-mode lexical vectors for a batch, scored in parallel.
    async fn score_batch(&self, texts: Vec<String>) -> Vec<SparseVector> {
        let scorer = self.lexical.clone();
        let count = texts.len();
        let scored = tokio::task::spawn_blocking(move || {
            texts
                .par_iter()
                .map(|text| scorer.score_document(text))
                .collect::<Vec<_>>()
        })
        .await;

        match scored {
            Ok(vectors) => vectors,
            Err(e) => {
                tracing::warn!(error = %e, "Batch lexical scoring failed, using degenerate vectors");
                vec![SparseVector::degenerate(); count]
            }
        }
    }
}
