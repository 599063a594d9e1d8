//! Question-to-chunks retrieval policy.

use std::sync::Arc;

use tracing::{debug, error};

use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

/// Default number of chunks retrieved per question.
pub const DEFAULT_TOP_K: usize = 3;

/// Embeds a question with the build-time provider and searches the store.
///
/// There is no query rewriting, reranking or metadata filtering. Any of those
/// belongs in a separate stage in front of or behind this one.
#[derive(Clone)]
pub struct Retriever {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    top_k: usize,
}

impl Retriever {
    /// Create a retriever returning `top_k` chunks per question.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if `top_k` is zero.
    pub fn new(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        vector_store: Arc<dyn VectorStore>,
        top_k: usize,
    ) -> Result<Self> {
        if top_k == 0 {
            return Err(RagError::Configuration("top_k must be greater than zero".to_string()));
        }
        Ok(Self { embedding_provider, vector_store, top_k })
    }

    /// The configured number of chunks per question.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Retrieve the configured `top_k` chunks for `question`.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<SearchResult>> {
        self.retrieve_with_k(question, self.top_k).await
    }

    /// Retrieve up to `k` chunks for `question`, most similar first.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] for a blank question or `k == 0`
    /// before the embedding provider is called, and propagates embedding and
    /// search failures.
    pub async fn retrieve_with_k(&self, question: &str, k: usize) -> Result<Vec<SearchResult>> {
        if question.trim().is_empty() {
            return Err(RagError::InvalidArgument("question must not be empty".to_string()));
        }
        if k == 0 {
            return Err(RagError::InvalidArgument("k must be greater than zero".to_string()));
        }

        let query_embedding = self.embedding_provider.embed(question).await.map_err(|e| {
            error!(error = %e, "embedding failed during retrieval");
            e
        })?;

        let results = self.vector_store.search(&query_embedding, k).await?;
        debug!(k, result_count = results.len(), "retrieved chunks");
        Ok(results)
    }
}
