//! Error types for the `docqa-rag` crate.

use thiserror::Error;

/// Errors that can occur in retrieval pipeline operations.
///
/// An empty retrieval result is not an error: it is represented as an empty
/// fused list and turned into an "insufficient information" answer by
/// [`Session::ask`](crate::Session::ask).
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid configuration: weights, chunk sizes, strategy names or
    /// vector dimensionality.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An embedding or generative model provider failed (network, quota, auth).
    #[error("Service error ({provider}): {message}")]
    ServiceError {
        /// The provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },
}

impl RagError {
    /// Shorthand for building a [`RagError::ServiceError`].
    pub fn service(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceError { provider: provider.into(), message: message.into() }
    }

    /// Returns `true` for configuration errors.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::ConfigError(_))
    }
}

/// A convenience result type for retrieval pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;
