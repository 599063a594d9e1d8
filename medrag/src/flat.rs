//! Exact brute-force vector index with directory persistence.
//!
//! [`FlatIndex`] keeps every chunk in insertion order and scores all of them
//! on each search. At single-document scale (low thousands of chunks) that is
//! fast enough and needs no approximate structure.
//!
//! On disk an index is a directory holding `manifest.json` (format version,
//! metric, dimensionality, embedding model, chunk count) and `chunks.jsonl`
//! (one serialized [`Chunk`] per line).

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{Metric, VectorStore};

const MANIFEST_FILE: &str = "manifest.json";
const CHUNKS_FILE: &str = "chunks.jsonl";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    metric: Metric,
    dimensions: usize,
    embedding_model: String,
    chunk_count: usize,
}

/// An immutable in-memory index searched exhaustively.
///
/// # Example
///
/// ```rust,ignore
/// use medrag::{FlatIndex, Metric};
///
/// let index = FlatIndex::build(chunks, Metric::Cosine, embedder.model_id())?;
/// index.save("vector_store/medical_index")?;
/// let reloaded = FlatIndex::load("vector_store/medical_index")?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    metric: Metric,
    dimensions: usize,
    embedding_model: String,
    chunks: Vec<Chunk>,
}

impl FlatIndex {
    /// Build an index from embedded chunks, keeping their order.
    ///
    /// The dimensionality is taken from the first chunk. An empty input
    /// produces an empty index.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if a chunk has no embedding or
    /// the embeddings disagree on dimensionality.
    pub fn build(
        chunks: Vec<Chunk>,
        metric: Metric,
        embedding_model: impl Into<String>,
    ) -> Result<Self> {
        let dimensions = chunks.first().map_or(0, |chunk| chunk.embedding.len());
        for chunk in &chunks {
            if chunk.embedding.is_empty() {
                return Err(RagError::InvalidArgument(format!(
                    "chunk '{}' has no embedding",
                    chunk.id
                )));
            }
            if chunk.embedding.len() != dimensions {
                return Err(RagError::InvalidArgument(format!(
                    "chunk '{}' has {} dimensions, expected {dimensions}",
                    chunk.id,
                    chunk.embedding.len()
                )));
            }
        }
        Ok(Self { metric, dimensions, embedding_model: embedding_model.into(), chunks })
    }

    /// The indexed chunks in insertion order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Exact top-`k` search. Also available through [`VectorStore::search`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `top_k` is zero or the query
    /// dimensionality does not match a non-empty index.
    pub fn nearest(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        if top_k == 0 {
            return Err(RagError::InvalidArgument("k must be greater than zero".to_string()));
        }
        if self.chunks.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(RagError::InvalidArgument(format!(
                "query has {} dimensions, index has {}",
                query.len(),
                self.dimensions
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                let score = self.metric.score(query, &chunk.embedding);
                (i, if score.is_nan() { f32::NEG_INFINITY } else { score })
            })
            .collect();

        // `sort_by` is stable, so equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchResult { chunk: self.chunks[i].clone(), score })
            .collect())
    }

    /// Whether `dir` contains a saved index manifest.
    pub fn exists(dir: impl AsRef<Path>) -> bool {
        dir.as_ref().join(MANIFEST_FILE).is_file()
    }

    /// Persist the index into `dir`, creating it if needed.
    ///
    /// Each file is written to a temporary sibling and renamed into place.
    /// The manifest goes last, so a crash mid-save leaves either the previous
    /// index or one that fails the chunk-count check on load.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Storage`] on any I/O or serialization failure.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .map_err(|e| RagError::storage(dir, format!("failed to create index directory: {e}")))?;

        let mut body = Vec::new();
        for chunk in &self.chunks {
            serde_json::to_writer(&mut body, chunk).map_err(|e| {
                RagError::storage(dir, format!("failed to serialize chunk '{}': {e}", chunk.id))
            })?;
            body.push(b'\n');
        }
        write_replacing(&dir.join(CHUNKS_FILE), &body)?;

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            metric: self.metric,
            dimensions: self.dimensions,
            embedding_model: self.embedding_model.clone(),
            chunk_count: self.chunks.len(),
        };
        let manifest = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| RagError::storage(dir, format!("failed to serialize manifest: {e}")))?;
        write_replacing(&dir.join(MANIFEST_FILE), &manifest)?;

        info!(path = %dir.display(), chunk_count = self.chunks.len(), "saved index");
        Ok(())
    }

    /// Load an index previously written by [`save`](FlatIndex::save).
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Storage`] if the directory is missing, a file is
    /// unreadable or malformed, the format version is unknown, or the chunks
    /// disagree with the manifest.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest = fs::read(&manifest_path)
            .map_err(|e| RagError::storage(&manifest_path, format!("failed to read manifest: {e}")))?;
        let manifest: Manifest = serde_json::from_slice(&manifest).map_err(|e| {
            RagError::storage(&manifest_path, format!("malformed manifest: {e}"))
        })?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(RagError::storage(
                &manifest_path,
                format!("unsupported format version {}", manifest.format_version),
            ));
        }

        let chunks_path = dir.join(CHUNKS_FILE);
        let body = fs::read_to_string(&chunks_path)
            .map_err(|e| RagError::storage(&chunks_path, format!("failed to read chunks: {e}")))?;

        let mut chunks = Vec::with_capacity(manifest.chunk_count);
        for (line_no, line) in body.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let chunk: Chunk = serde_json::from_str(line).map_err(|e| {
                RagError::storage(&chunks_path, format!("malformed chunk on line {}: {e}", line_no + 1))
            })?;
            if chunk.embedding.len() != manifest.dimensions {
                return Err(RagError::storage(
                    &chunks_path,
                    format!(
                        "chunk '{}' has {} dimensions, manifest says {}",
                        chunk.id,
                        chunk.embedding.len(),
                        manifest.dimensions
                    ),
                ));
            }
            chunks.push(chunk);
        }

        if chunks.len() != manifest.chunk_count {
            return Err(RagError::storage(
                &chunks_path,
                format!("found {} chunks, manifest says {}", chunks.len(), manifest.chunk_count),
            ));
        }

        debug!(path = %dir.display(), chunk_count = chunks.len(), "loaded index");
        Ok(Self {
            metric: manifest.metric,
            dimensions: manifest.dimensions,
            embedding_model: manifest.embedding_model,
            chunks,
        })
    }
}

fn write_replacing(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| RagError::storage(&tmp, format!("write failed: {e}")))?;
    fs::rename(&tmp, path).map_err(|e| RagError::storage(path, format!("rename failed: {e}")))
}

#[async_trait]
impl VectorStore for FlatIndex {
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<SearchResult>> {
        self.nearest(embedding, top_k)
    }

    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }
}
