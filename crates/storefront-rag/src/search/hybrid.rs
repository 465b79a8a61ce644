use std::collections::HashMap;

use crate::types::CandidateRecord;

/// Fused similarity for one record id.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedScore {
    pub id: String,
    pub score: f32,
    pub dense: f32,
    pub sparse: f32,
}

/// Scale scores into [0, 1] by the list maximum. Unlike min-max, the weakest
/// candidate keeps a non-zero weight, which the rerank multipliers rely on.
fn normalize(results: &[(String, f32)]) -> HashMap<String, f32> {
    let max = results.iter().map(|(_, s)| *s).fold(0.0f32, f32::max);
    if max <= 0.0 {
        return results.iter().map(|(id, _)| (id.clone(), 0.0)).collect();
    }
    results
        .iter()
        .map(|(id, s)| (id.clone(), s.max(0.0) / max))
        .collect()
}

/// Weighted combination: alpha-blends normalized dense and sparse scores.
/// Raw scores are carried through for diagnostics.
pub fn weighted_fusion(
    dense_results: Vec<(String, f32)>,
    sparse_results: Vec<(String, f32)>,
    alpha: f32,
    top_k: usize,
) -> Vec<FusedScore> {
    let norm_dense = normalize(&dense_results);
    let norm_sparse = normalize(&sparse_results);

    let mut scores: HashMap<String, FusedScore> = HashMap::new();

    for (id, raw) in &dense_results {
        let n = norm_dense.get(id).copied().unwrap_or(0.0);
        scores.insert(
            id.clone(),
            FusedScore {
                id: id.clone(),
                score: alpha * n,
                dense: *raw,
                sparse: 0.0,
            },
        );
    }

    for (id, raw) in &sparse_results {
        let n = norm_sparse.get(id).copied().unwrap_or(0.0);
        scores
            .entry(id.clone())
            .and_modify(|fused| {
                fused.score += (1.0 - alpha) * n;
                fused.sparse = *raw;
            })
            .or_insert(FusedScore {
                id: id.clone(),
                score: (1.0 - alpha) * n,
                dense: 0.0,
                sparse: *raw,
            });
    }

    let mut merged: Vec<FusedScore> = scores.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    merged.truncate(top_k);
    merged
}

/// Merge several result sets, keeping the best-scoring record per handle.
/// Output order follows first appearance.
pub fn merge_deduplicated(result_sets: Vec<Vec<CandidateRecord>>) -> Vec<CandidateRecord> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<CandidateRecord> = Vec::new();

    for record in result_sets.into_iter().flatten() {
        let key = record.dedup_key().to_string();
        match position.get(&key) {
            Some(&idx) => {
                if record.score > merged[idx].score {
                    merged[idx] = record;
                }
            }
            None => {
                position.insert(key, merged.len());
                merged.push(record);
            }
        }
    }
    merged
}
