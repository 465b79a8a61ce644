//! Language-model completion collaborator.
//!
//! Transport, retries and quotas live with the implementor; the pipeline only
//! sends a system prompt and a user prompt and reads text back.

use async_trait::async_trait;

use crate::error::ServiceError;

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, ServiceError>;
}
