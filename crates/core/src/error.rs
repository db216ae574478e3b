use thiserror::Error;

/// Failure flavour a provider adapter attaches when it can tell why a
/// remote call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFault {
    RateLimited,
    Auth,
    Network,
    Timeout,
    Other,
}

impl std::fmt::Display for ProviderFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ProviderFault::RateLimited => "rate-limited",
            ProviderFault::Auth => "auth",
            ProviderFault::Network => "network",
            ProviderFault::Timeout => "timeout",
            ProviderFault::Other => "other",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("duplicate document: {0}")]
    Conflict(String),

    #[error("store error ({backend}): {details}")]
    Store { backend: String, details: String },

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("{kind} provider failed ({fault}): {details}")]
    Provider {
        kind: String,
        fault: ProviderFault,
        details: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("retrieval failed: {0}")]
    Retrieval(Box<EngineError>),

    #[error("generation failed: {0}")]
    Generation(Box<EngineError>),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn validation(details: impl Into<String>) -> Self {
        Self::Validation(details.into())
    }

    pub fn conflict(details: impl Into<String>) -> Self {
        Self::Conflict(details.into())
    }

    pub fn store(backend: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Store {
            backend: backend.into(),
            details: details.into(),
        }
    }

    pub fn provider(
        kind: impl Into<String>,
        fault: ProviderFault,
        details: impl Into<String>,
    ) -> Self {
        Self::Provider {
            kind: kind.into(),
            fault,
            details: details.into(),
        }
    }

    pub fn embedding(details: impl Into<String>) -> Self {
        Self::provider("embedding", ProviderFault::Other, details)
    }

    pub fn generation_provider(details: impl Into<String>) -> Self {
        Self::provider("generation", ProviderFault::Other, details)
    }

    /// Wrap as a retrieval-stage failure without discarding the cause.
    pub fn during_retrieval(self) -> Self {
        Self::Retrieval(Box::new(self))
    }

    /// Wrap as a generation-stage failure.
    pub fn during_generation(self) -> Self {
        Self::Generation(Box::new(self))
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
