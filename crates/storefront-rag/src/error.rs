use thiserror::Error;

/// Failure reported by an external collaborator (completion, embedding,
/// vector index, site configuration).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ServiceError {
    /// The service could not be reached at all.
    #[error("{service} unavailable: {message}")]
    Unavailable {
        service: &'static str,
        message: String,
    },
    /// The service answered but the request failed.
    #[error("{service} request failed: {message}")]
    Failed {
        service: &'static str,
        message: String,
    },
}

impl ServiceError {
    pub fn unavailable(service: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            service,
            message: message.into(),
        }
    }

    pub fn failed(service: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            service,
            message: message.into(),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// The classifier's model reply did not have the required structure.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassificationError {
    #[error("classifier reply is not a JSON object: {0}")]
    Malformed(String),
    #[error("classifier reply is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("classifier reply has unknown content type `{0}`")]
    InvalidType(String),
}

/// Why a classification could not be produced: the completion call failed,
/// or it answered with something that does not fit the schema.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifyError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Invalid(#[from] ClassificationError),
}

/// Errors surfaced to the serving layer. Everything else is recovered inside the turn.
#[derive(Debug, Error)]
pub enum AssistError {
    #[error("upstream service unavailable: {0}")]
    UpstreamUnavailable(#[source] ServiceError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AssistError {
    /// Message safe to show to the shopper.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::UpstreamUnavailable(_) => {
                "Sorry, I'm having trouble right now. Please try again in a moment."
            }
            Self::InvalidRequest(_) => "Sorry, I couldn't understand that request.",
        }
    }
}
