use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistConfig {
    pub retrieval: RetrievalConfig,
    pub rerank: RerankConfig,
    pub lexical: LexicalConfig,
    pub validator: ValidatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates fetched from the index per main-lane query
    pub main_candidates: usize,
    /// Candidates fetched from the index for the QA lane
    pub qa_candidates: usize,
    pub main_top_n: usize,
    pub qa_top_n: usize,
    /// Prior turns folded into the QA lane's enhanced query
    pub history_turns_for_qa: usize,
    pub content_namespace: String,
    pub qa_namespace: String,
    /// Dense weight when the in-memory index fuses dense and sparse scores
    pub hybrid_alpha: f32,
}

/// Rerank multipliers. Empirical values; kept overridable for recalibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub type_match_boost: f32,
    pub collection_match_boost: f32,
    pub metadata_match_weight: f32,
    pub exact_name_boost: f32,
    pub partial_name_boost: f32,
    pub continuity_exact_boost: f32,
    pub continuity_partial_boost: f32,
    pub qa_metadata_weight: f32,
    pub qa_overlap_weight: f32,
    pub purchase_checkout_boost: f32,
    pub qa_continuity_boost: f32,
    pub qa_score_ceiling: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalConfig {
    pub k1: f32,
    pub b: f32,
    pub query_max_terms: usize,
    pub index_max_terms: usize,
    pub enable_bigrams: bool,
    /// Root for per-call scratch indexes
    pub scratch_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub highlight_max_words: usize,
}

impl AssistConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        let r = &self.retrieval;
        if r.main_top_n == 0 || r.qa_top_n == 0 {
            return Err("retrieval.main_top_n and retrieval.qa_top_n must be > 0".into());
        }
        if r.main_candidates < r.main_top_n {
            return Err("retrieval.main_candidates must be >= main_top_n".into());
        }
        if r.qa_candidates < r.qa_top_n {
            return Err("retrieval.qa_candidates must be >= qa_top_n".into());
        }
        if r.content_namespace.is_empty() || r.qa_namespace.is_empty() {
            return Err("retrieval namespaces must not be empty".into());
        }
        if r.content_namespace == r.qa_namespace {
            return Err("retrieval.content_namespace and qa_namespace must differ".into());
        }
        if !(0.0..=1.0).contains(&r.hybrid_alpha) {
            return Err("retrieval.hybrid_alpha must be in [0.0, 1.0]".into());
        }
        if self.lexical.k1 <= 0.0 {
            return Err("lexical.k1 must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.lexical.b) {
            return Err("lexical.b must be in [0.0, 1.0]".into());
        }
        if self.lexical.query_max_terms == 0
            || self.lexical.index_max_terms < self.lexical.query_max_terms
        {
            return Err("lexical term limits must satisfy 0 < query_max_terms <= index_max_terms".into());
        }
        if self.rerank.qa_score_ceiling <= 0.0 {
            return Err("rerank.qa_score_ceiling must be > 0".into());
        }
        if self.validator.highlight_max_words == 0 {
            return Err("validator.highlight_max_words must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            main_candidates: 10,
            qa_candidates: 10,
            main_top_n: 2,
            qa_top_n: 3,
            history_turns_for_qa: 2,
            content_namespace: "content".to_string(),
            qa_namespace: "qa".to_string(),
            hybrid_alpha: 0.7,
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            type_match_boost: 3.0,
            collection_match_boost: 30.0,
            metadata_match_weight: 2.0,
            exact_name_boost: 100.0,
            partial_name_boost: 10.0,
            continuity_exact_boost: 50.0,
            continuity_partial_boost: 10.0,
            qa_metadata_weight: 2.0,
            qa_overlap_weight: 2.0,
            purchase_checkout_boost: 3.0,
            qa_continuity_boost: 1.5,
            qa_score_ceiling: 20.0,
        }
    }
}

impl Default for LexicalConfig {
    fn default() -> Self {
        let scratch_dir = if let Ok(env_path) = std::env::var("STOREFRONT_RAG_SCRATCH_DIR") {
            PathBuf::from(env_path)
        } else {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("storefront-rag")
                .join("lexical")
        };

        Self {
            k1: 1.2,
            b: 0.75,
            query_max_terms: 1000,
            index_max_terms: 32000,
            enable_bigrams: true,
            scratch_dir,
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            highlight_max_words: 15,
        }
    }
}
