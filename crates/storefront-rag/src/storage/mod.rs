pub mod site_config;
pub mod vector_index;

pub use site_config::{InMemorySiteConfigStore, SiteConfigStore};
pub use vector_index::{InMemoryVectorIndex, RecordMetadata, VectorIndex, VectorRecord};
