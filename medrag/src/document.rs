//! Data types for source pages, chunks, search results and answers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One page of the source document, as produced by the text extractor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Identifier of the source (file stem, book name, ...).
    pub source_id: String,
    /// 1-based page number within the source.
    pub page_number: u32,
    /// The extracted page text.
    pub text: String,
    /// Key-value metadata carried over to every chunk of this page.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Create a page record with empty metadata.
    pub fn new(source_id: impl Into<String>, page_number: u32, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            page_number,
            text: text.into(),
            metadata: HashMap::new(),
        }
    }
}

/// A bounded span of a [`Document`] with its vector embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier, `{source_id}:{page_number}:{chunk_index}`.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// The source the chunk was cut from.
    pub source_id: String,
    /// The page the chunk was cut from.
    pub page_number: u32,
    /// The vector embedding for this chunk's text. Empty until embedded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Metadata inherited from the page plus `chunk_index`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}

/// How an [`AnswerResponse`] was produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    /// The model composed an answer from extracted facts.
    Answered,
    /// Retrieval returned nothing; the chain was never run.
    NoContext,
    /// Every extraction came back empty; the fixed "not sure" answer was used.
    Unknown,
    /// A per-query failure was turned into an apology.
    Degraded,
}

/// The result of one `ask` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerResponse {
    /// The final answer text shown to the user.
    pub answer: String,
    /// The chunks the answer was based on, most relevant first.
    ///
    /// Empty means nothing was retrieved. For every status except
    /// [`AnswerStatus::Degraded`] that implies the fixed could-not-find
    /// answer. A degraded response may also be empty when the failure came
    /// before or during retrieval, such as a blank question or an embedding
    /// error.
    pub retrieved_chunks: Vec<SearchResult>,
    /// How the answer was produced.
    pub status: AnswerStatus,
}
