//! Vector store trait and similarity metrics.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::SearchResult;
use crate::error::{RagError, Result};

/// The similarity measure used to rank chunks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity in `[-1, 1]`.
    #[default]
    Cosine,
    /// Euclidean distance mapped to `1 / (1 + distance)`.
    L2,
}

impl Metric {
    /// Score `candidate` against `query`. Higher is always more similar.
    pub fn score(self, query: &[f32], candidate: &[f32]) -> f32 {
        match self {
            Self::Cosine => cosine_similarity(query, candidate),
            Self::L2 => {
                let distance: f32 =
                    query.iter().zip(candidate).map(|(a, b)| (a - b) * (a - b)).sum::<f32>().sqrt();
                1.0 / (1.0 + distance)
            }
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosine => f.write_str("cosine"),
            Self::L2 => f.write_str("l2"),
        }
    }
}

impl FromStr for Metric {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "l2" | "euclidean" => Ok(Self::L2),
            other => Err(RagError::Configuration(format!("unknown similarity metric '{other}'"))),
        }
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// A read-only searchable collection of embedded chunks.
///
/// [`FlatIndex`](crate::FlatIndex) is the exact brute-force implementation.
/// The trait is async so that an approximate or remote backend can be
/// swapped in behind the same retriever.
///
/// # Example
///
/// ```rust,ignore
/// use medrag::{FlatIndex, Metric, VectorStore};
///
/// let index = FlatIndex::build(chunks, Metric::Cosine, "hashing-384")?;
/// let results = index.search(&query_embedding, 3).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Search for the `top_k` most similar chunks to the given embedding.
    ///
    /// Returns results ordered by descending similarity score, ties in
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `top_k` is zero or the query
    /// has the wrong dimensionality.
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>>;

    /// Number of chunks in the store.
    fn len(&self) -> usize;

    /// Whether the store holds no chunks.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimensionality of the stored embeddings.
    fn dimensions(&self) -> usize;

    /// The metric results are ranked by.
    fn metric(&self) -> Metric;

    /// Identifier of the embedding model the chunks were embedded with.
    fn embedding_model(&self) -> &str;
}
