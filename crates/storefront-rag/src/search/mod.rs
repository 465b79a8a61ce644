pub mod hybrid;
pub mod lexical;
pub mod text_stats;

pub use hybrid::{merge_deduplicated, weighted_fusion, FusedScore};
pub use lexical::{LexicalScorer, ScoreMode};
pub use text_stats::{ScratchIndex, TantivyTermStatistics, TermStatistics};
