//! Per-turn pipeline: policy override, classification, permission gate,
//! two-lane retrieval, completion and response validation.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Instant;

use crate::config::AssistConfig;
use crate::embeddings::EmbeddingService;
use crate::error::{AssistError, ClassifyError};
use crate::llm::CompletionService;
use crate::rag::intent_classifier::IntentClassifier;
use crate::rag::permission_gate::{check_turn, keyword_override, GateDecision};
use crate::rag::prompt::build_prompts;
use crate::rag::response_validator::ResponseValidator;
use crate::rag::retrieval::{HybridRetriever, RetrievalOutcome};
use crate::search::{LexicalScorer, TermStatistics};
use crate::storage::{SiteConfigStore, VectorIndex};
use crate::types::{
    AssistRequest, AssistResponse, Classification, ResolvedAction, RetrievalDiagnostics,
    SiteConfig,
};

const CLASSIFICATION_FALLBACK_MESSAGE: &str =
    "Sorry, I didn't quite understand that. Could you say it another way?";

pub struct AssistEngine {
    config: AssistConfig,
    completion: Arc<dyn CompletionService>,
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<dyn VectorIndex>,
    sites: Arc<dyn SiteConfigStore>,
    classifier: IntentClassifier,
    retriever: HybridRetriever,
    validator: ResponseValidator,
}

impl AssistEngine {
    pub fn new(
        config: AssistConfig,
        completion: Arc<dyn CompletionService>,
        embedder: Arc<dyn EmbeddingService>,
        index: Arc<dyn VectorIndex>,
        sites: Arc<dyn SiteConfigStore>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow!("Invalid assist config: {}", e))?;

        if embedder.dimension() == 0 {
            return Err(anyhow!("Embedding service reports a zero dimension"));
        }

        let lexical = LexicalScorer::new(config.lexical.clone());
        let retriever = HybridRetriever::new(embedder.clone(), index.clone(), lexical, &config);

        tracing::info!(
            content_namespace = %config.retrieval.content_namespace,
            qa_namespace = %config.retrieval.qa_namespace,
            dimension = embedder.dimension(),
            "Assist engine ready"
        );

        Ok(Self {
            classifier: IntentClassifier::new(completion.clone()),
            validator: ResponseValidator::new(config.validator.clone()),
            retriever,
            config,
            completion,
            embedder,
            index,
            sites,
        })
    }

    /// Swap the lexical-statistics backend used at query time.
    pub fn with_term_statistics(mut self, stats: Arc<dyn TermStatistics>) -> Self {
        let lexical = LexicalScorer::with_backend(self.config.lexical.clone(), stats);
        self.retriever =
            HybridRetriever::new(self.embedder.clone(), self.index.clone(), lexical, &self.config);
        self
    }

    pub fn config(&self) -> &AssistConfig {
        &self.config
    }

    /// Handle one shopper turn. Recovered failures still produce a complete
    /// response; only unreachable collaborators and bad requests are errors.
    pub async fn handle(&self, request: AssistRequest) -> Result<AssistResponse, AssistError> {
        let start = Instant::now();
        let utterance = request.utterance.trim();
        if utterance.is_empty() {
            return Err(AssistError::InvalidRequest("utterance is empty".into()));
        }
        if request.site_id.trim().is_empty() {
            return Err(AssistError::InvalidRequest("site id is empty".into()));
        }

        if let Some(resolved) = keyword_override(utterance) {
            return Ok(self.respond(&request, resolved, None, RetrievalOutcome::default(), start));
        }

        let site = self.site_config(&request.site_id).await?;

        let classification = match self
            .classifier
            .classify(
                utterance,
                &request.conversation_context,
                request.page_snapshot.as_ref(),
            )
            .await
        {
            Ok(classification) => classification,
            Err(ClassifyError::Service(e)) => return Err(AssistError::UpstreamUnavailable(e)),
            Err(ClassifyError::Invalid(e)) => {
                tracing::warn!(error = %e, "Classification failed, answering with fallback");
                let resolved = ResolvedAction::none(CLASSIFICATION_FALLBACK_MESSAGE);
                return Ok(self.respond(&request, resolved, None, RetrievalOutcome::default(), start));
            }
        };

        if let GateDecision::Denied {
            action,
            kind,
            response,
        } = check_turn(&classification, &request.conversation_context, &site.permissions)
        {
            tracing::info!(action = %action, denial = ?kind, "Action denied before retrieval");
            return Ok(self.respond(
                &request,
                response,
                Some(classification),
                RetrievalOutcome::default(),
                start,
            ));
        }

        let retrieval = self
            .retriever
            .retrieve(utterance, &classification, &request.conversation_context)
            .await
            .map_err(AssistError::UpstreamUnavailable)?;

        let (system_prompt, user_prompt) =
            build_prompts(&request, &classification, &retrieval, &site);
        let raw = self
            .completion
            .complete(&system_prompt, &user_prompt)
            .await
            .map_err(AssistError::UpstreamUnavailable)?;

        let resolved = self.validator.validate(
            &raw,
            utterance,
            &classification,
            &retrieval.available,
            &site.permissions,
        );
        Ok(self.respond(&request, resolved, Some(classification), retrieval, start))
    }

    /// Unknown sites fall back to deny-all defaults; an unreachable store fails the turn.
    async fn site_config(&self, site_id: &str) -> Result<SiteConfig, AssistError> {
        match self.sites.site_config(site_id).await {
            Ok(site) => Ok(site),
            Err(e) if e.is_unavailable() => Err(AssistError::UpstreamUnavailable(e)),
            Err(e) => {
                tracing::warn!(site_id = site_id, error = %e, "Site config lookup failed, all actions disabled");
                Ok(SiteConfig::default())
            }
        }
    }

    fn respond(
        &self,
        request: &AssistRequest,
        resolved: ResolvedAction,
        classification: Option<Classification>,
        retrieval: RetrievalOutcome,
        start: Instant,
    ) -> AssistResponse {
        let page_reference = resolved
            .url
            .clone()
            .or_else(|| {
                retrieval
                    .main_results
                    .first()
                    .and_then(|r| r.record.url_path())
            })
            .or_else(|| request.current_page_url.clone());

        let response = AssistResponse::from_resolved(
            resolved,
            page_reference,
            RetrievalDiagnostics {
                main_results: retrieval.main_results,
                qa_results: retrieval.qa_results,
                classification,
            },
        );

        tracing::info!(
            site_id = %request.site_id,
            thread_id = request.thread_id.as_deref().unwrap_or("-"),
            action = %response.action,
            url = response.url.as_deref().unwrap_or("-"),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Turn resolved"
        );
        response
    }
}
