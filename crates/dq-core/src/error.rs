//! Error types for the retrieval engine.

use thiserror::Error;

/// Result type alias using RagError.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur in the retrieval engine.
///
/// Only [`RagError::Config`] is fatal. The collaborator errors
/// (`Embedding`, `VectorStore`, `Rerank`, `Timeout`) are absorbed by the
/// engine and surface as flags on the retrieval result.
#[derive(Error, Debug)]
pub enum RagError {
    /// Document not found.
    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Invalid tunables, rejected when the engine is built.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Embedding service error (quota, network, bad dimension).
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// Vector store error.
    #[error("Vector store error: {message}")]
    VectorStore { message: String },

    /// Reranking service error.
    #[error("Rerank error: {message}")]
    Rerank { message: String },

    /// An external call exceeded its deadline.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a vector store error.
    pub fn vector_store(message: impl Into<String>) -> Self {
        Self::VectorStore {
            message: message.into(),
        }
    }

    /// Create a rerank error.
    pub fn rerank(message: impl Into<String>) -> Self {
        Self::Rerank {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Whether the engine can degrade around this error instead of failing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Embedding { .. }
                | Self::VectorStore { .. }
                | Self::Rerank { .. }
                | Self::Timeout { .. }
        )
    }

    /// Get a stable error code for API consumers.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DocumentNotFound { .. } => "DOCUMENT_NOT_FOUND",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::VectorStore { .. } => "VECTOR_STORE_ERROR",
            Self::Rerank { .. } => "RERANK_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}
