//! Error types shared across the indexing and retrieval layers.

use thiserror::Error;

/// Failure reported by an embedding provider for a whole batch.
///
/// `Clone` so a single batch failure can be delivered to every request
/// that was waiting on that batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Network failure, timeout or rate limit. Worth retrying.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Credentials were rejected.
    #[error("provider rejected credentials: {0}")]
    Authentication(String),

    /// The request or the response did not have the expected shape.
    #[error("malformed provider exchange: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Errors returned by the batch scheduler to an individual `embed` caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmbedError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("embedding scheduler is shut down")]
    SchedulerClosed,
}

/// Vector arithmetic misuse. These are programming errors, never coerced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VectorError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("cosine similarity is undefined for a zero-magnitude vector")]
    ZeroMagnitude,
}

/// Caller-facing error for store, search and debug operations.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("function store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("embedding provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("embedding scheduler is shut down")]
    SchedulerClosed,

    #[error("invalid vector: {0}")]
    InvalidVector(#[from] VectorError),
}

impl ContextError {
    /// True when repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ContextError::Provider(err) => err.is_retryable(),
            ContextError::StoreUnavailable(_) => true,
            ContextError::SchedulerClosed | ContextError::InvalidVector(_) => false,
        }
    }
}

impl From<EmbedError> for ContextError {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::Provider(err) => ContextError::Provider(err),
            EmbedError::SchedulerClosed => ContextError::SchedulerClosed,
        }
    }
}

impl From<std::io::Error> for ContextError {
    fn from(e: std::io::Error) -> Self {
        ContextError::StoreUnavailable(e.to_string())
    }
}

impl From<serde_json::Error> for ContextError {
    fn from(e: serde_json::Error) -> Self {
        ContextError::StoreUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_retryability() {
        assert!(ProviderError::Transient("429".to_string()).is_retryable());
        assert!(!ProviderError::Authentication("401".to_string()).is_retryable());
        assert!(!ProviderError::Malformed("bad json".to_string()).is_retryable());
    }

    #[test]
    fn embed_error_maps_to_context_error() {
        let err: ContextError = EmbedError::Provider(ProviderError::Authentication(
            "invalid key".to_string(),
        ))
        .into();
        assert!(matches!(
            err,
            ContextError::Provider(ProviderError::Authentication(_))
        ));
        assert!(!err.is_retryable());

        let closed: ContextError = EmbedError::SchedulerClosed.into();
        assert!(matches!(closed, ContextError::SchedulerClosed));
    }

    #[test]
    fn error_display() {
        let err = VectorError::DimensionMismatch {
            expected: 64,
            actual: 32,
        };
        assert_eq!(
            err.to_string(),
            "vector dimension mismatch: expected 64, got 32"
        );
        let ctx = ContextError::StoreUnavailable("disk full".to_string());
        assert_eq!(ctx.to_string(), "function store unavailable: disk full");
    }
}
