use async_trait::async_trait;

use crate::error::ServiceError;

/// Dense embedding collaborator. Index-time and query-time callers share the
/// same model, so `dimension()` is a fixed contract.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;

    /// Embedding vector dimension
    fn dimension(&self) -> usize;

    /// Embed and check the result against `dimension()`.
    async fn embed_checked(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        let vector = self.embed(text).await?;
        if vector.len() != self.dimension() {
            return Err(ServiceError::failed(
                "embedding",
                format!(
                    "expected {} dimensions, got {}",
                    self.dimension(),
                    vector.len()
                ),
            ));
        }
        Ok(vector)
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::search::LexicalScorer;

    /// Deterministic bag-of-stems embedder: each analyzed term bumps one bucket.
    pub struct HashingEmbedder {
        pub dimension: usize,
    }

    impl Default for HashingEmbedder {
        fn default() -> Self {
            Self { dimension: 64 }
        }
    }

    #[async_trait]
    impl EmbeddingService for HashingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
            let mut vector = vec![0.0f32; self.dimension];
            for term in LexicalScorer::analyze(text) {
                let bucket = crate::search::lexical::term_index(&term) as usize % self.dimension;
                vector[bucket] += 1.0;
            }
            Ok(vector)
        }

        fn dimension(&self) -> usize {
            self.dimension
        }
    }
}
