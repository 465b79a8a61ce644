pub mod assist_engine;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod indexing;
pub mod llm;
pub mod rag;
pub mod reranking;
pub mod search;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
pub use assist_engine::AssistEngine;
pub use config::AssistConfig;
pub use embeddings::EmbeddingService;
pub use error::{AssistError, ClassificationError, ServiceError};
pub use indexing::{ContentIndexer, ContentItem, IndexingReport, QaPair};
pub use llm::CompletionService;
pub use storage::{InMemorySiteConfigStore, InMemoryVectorIndex, SiteConfigStore, VectorIndex};
pub use types::{
    Action, AssistRequest, AssistResponse, Classification, ConversationContext, PermissionSet,
    ResolvedAction,
};
