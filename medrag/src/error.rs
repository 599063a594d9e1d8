//! Error types for the `medrag` crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building, loading or querying the index.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid chunking, retrieval or provider parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An embedding or generative model could not be loaded or reached.
    #[error("Model load error ({provider}): {message}")]
    ModelLoad {
        /// The provider that failed to load.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The index artifact is missing, unreadable or inconsistent.
    #[error("Storage error at {}: {message}", path.display())]
    Storage {
        /// The file or directory involved.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// No index has been built at the configured location yet.
    #[error("index not ready at {}: run the ingestion step first", path.display())]
    IndexNotReady {
        /// The index directory that was expected.
        path: PathBuf,
    },

    /// A caller-supplied argument was rejected before any model call.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An embedding call failed after the provider was loaded.
    #[error("Embedding error ({provider}): {message}")]
    Embedding {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A language-model call failed or timed out mid-query.
    #[error("Generation error ({model}): {message}")]
    Generation {
        /// The model that produced the error.
        model: String,
        /// A description of the failure.
        message: String,
    },
}

impl RagError {
    pub(crate) fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage { path: path.into(), message: message.into() }
    }

    /// Whether this error belongs to a single query rather than to the pipeline.
    ///
    /// Per-query errors degrade to an apology; the rest abort initialization.
    pub fn is_per_query(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::Embedding { .. } | Self::Generation { .. })
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
