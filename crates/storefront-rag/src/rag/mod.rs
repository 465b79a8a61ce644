//! Turn-level pipeline stages: classification, retrieval, gating, prompting
//! and validation of the model's reply.

pub mod intent_classifier;
pub mod permission_gate;
pub mod prompt;
pub mod response_validator;
pub mod retrieval;
pub mod structured_output;
pub mod url_resolver;

pub use intent_classifier::{ContinuityState, Heuristics, IntentClassifier};
pub use permission_gate::{check_action, check_turn, keyword_override, GateDecision};
pub use prompt::build_prompts;
pub use response_validator::{clean_highlight_text, ResponseValidator};
pub use retrieval::{enhanced_query, HybridRetriever, RetrievalOutcome};
pub use structured_output::parse_json_object;
pub use url_resolver::{normalize_path, AvailableContent, ResolutionStep, UrlResolver};
