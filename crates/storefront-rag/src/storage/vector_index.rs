use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::embeddings::cosine_similarity;
use crate::error::ServiceError;
use crate::search::hybrid::weighted_fusion;
use crate::types::{CandidateRecord, ContentType, MetadataFilter, RecordKind, SparseVector};

/// Metadata stored with every indexed vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub kind: RecordKind,
    pub handle: Option<String>,
    pub title: String,
    pub text: String,
    pub blog_handle: Option<String>,
    pub content_type: Option<ContentType>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub metadata: RecordMetadata,
}

impl VectorRecord {
    fn to_candidate(&self, score: f32, dense_score: f32, sparse_score: f32) -> CandidateRecord {
        let m = &self.metadata;
        CandidateRecord {
            id: self.id.clone(),
            kind: m.kind,
            handle: m.handle.clone(),
            title: m.title.clone(),
            text: m.text.clone(),
            blog_handle: m.blog_handle.clone(),
            content_type: m.content_type,
            category: m.category.clone(),
            sub_category: m.sub_category.clone(),
            score,
            dense_score,
            sparse_score,
        }
    }
}

/// Hybrid dense+sparse vector index, partitioned by namespace.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, namespace: &str, record: VectorRecord) -> Result<(), ServiceError>;

    async fn query(
        &self,
        namespace: &str,
        dense: &[f32],
        sparse: &SparseVector,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<CandidateRecord>, ServiceError>;

    async fn delete_all(&self, namespace: &str) -> Result<(), ServiceError>;
}

/// Index kept in process memory. Dense cosine and sparse dot-product scores are
/// computed separately and fused with `weighted_fusion`.
pub struct InMemoryVectorIndex {
    namespaces: RwLock<HashMap<String, HashMap<String, VectorRecord>>>,
    alpha: f32,
}

impl InMemoryVectorIndex {
    pub fn new(alpha: f32) -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
            alpha: alpha.clamp(0.0, 1.0),
        }
    }

    pub fn count(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .get(namespace)
            .map(|records| records.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new(0.7)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, namespace: &str, record: VectorRecord) -> Result<(), ServiceError> {
        if record.id.is_empty() {
            return Err(ServiceError::failed("vector-index", "record id must not be empty"));
        }
        self.namespaces
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        dense: &[f32],
        sparse: &SparseVector,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<CandidateRecord>, ServiceError> {
        let guard = self.namespaces.read();
        let Some(records) = guard.get(namespace) else {
            return Ok(Vec::new());
        };

        // A degenerate query vector carries no lexical signal: rank dense-only.
        let use_sparse = !sparse.is_empty() && !sparse.is_degenerate();

        let mut dense_results = Vec::new();
        let mut sparse_results = Vec::new();
        for record in records.values() {
            let candidate_view = record.to_candidate(0.0, 0.0, 0.0);
            if let Some(f) = filter {
                if !f.matches(&candidate_view) {
                    continue;
                }
            }
            dense_results.push((record.id.clone(), cosine_similarity(dense, &record.dense)));
            if use_sparse {
                let s = sparse.dot(&record.sparse);
                if s > 0.0 {
                    sparse_results.push((record.id.clone(), s));
                }
            }
        }

        let alpha = if use_sparse { self.alpha } else { 1.0 };
        let fused = weighted_fusion(dense_results, sparse_results, alpha, top_k);

        Ok(fused
            .into_iter()
            .filter_map(|f| {
                records
                    .get(&f.id)
                    .map(|r| r.to_candidate(f.score, f.dense, f.sparse))
            })
            .collect())
    }

    async fn delete_all(&self, namespace: &str) -> Result<(), ServiceError> {
        self.namespaces.write().remove(namespace);
        Ok(())
    }
}
