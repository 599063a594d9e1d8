//! Index building from extracted page text.
//!
//! PDF extraction happens upstream. This module reads its output, either a
//! directory of per-page `.txt` files or a JSON-lines file of page records,
//! and turns it into a saved [`FlatIndex`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::chunking::Chunker;
use crate::config::RagConfig;
use crate::document::Document;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::flat::FlatIndex;

/// Read every `.txt` file under `dir` as one page.
///
/// Files are visited in path order. The source id is the file stem and the
/// page number is the last run of digits in the stem (`page_012.txt` is page
/// 12), falling back to the 1-based position of the file.
///
/// # Errors
///
/// Returns [`RagError::Storage`] if `dir` is not a directory, an entry under
/// it cannot be visited (including a dangling symlink), or a file cannot be
/// read. Symlinks are followed.
pub fn load_pages_from_dir(dir: impl AsRef<Path>) -> Result<Vec<Document>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(RagError::storage(dir, "page directory not found"));
    }

    let mut files: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(dir).to_path_buf();
            error!(path = %path.display(), error = %e, "failed to walk page directory");
            RagError::storage(path, format!("failed to walk page directory: {e}"))
        })?;
        if entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext == "txt")
        {
            files.push(entry.into_path());
        }
    }
    files.sort();

    let mut pages = Vec::with_capacity(files.len());
    for (position, path) in files.iter().enumerate() {
        let text = fs::read_to_string(path)
            .map_err(|e| RagError::storage(path, format!("failed to read page: {e}")))?;
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let fallback = u32::try_from(position + 1).unwrap_or(u32::MAX);
        let page_number = trailing_number(&stem).unwrap_or(fallback);
        pages.push(Document::new(stem, page_number, text));
    }

    debug!(path = %dir.display(), page_count = pages.len(), "loaded page directory");
    Ok(pages)
}

/// Read page records, one JSON object per non-blank line.
///
/// # Errors
///
/// Returns [`RagError::Storage`] if the file cannot be read or a line is not
/// a valid page record.
pub fn load_pages_from_jsonl(path: impl AsRef<Path>) -> Result<Vec<Document>> {
    let path = path.as_ref();
    let body = fs::read_to_string(path)
        .map_err(|e| RagError::storage(path, format!("failed to read pages: {e}")))?;

    body.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<Document>(line).map_err(|e| {
                RagError::storage(path, format!("malformed page record on line {}: {e}", i + 1))
            })
        })
        .collect()
}

/// Load pages from a `.jsonl` file or a directory of `.txt` files.
pub fn load_pages(path: impl AsRef<Path>) -> Result<Vec<Document>> {
    let path = path.as_ref();
    if path.is_dir() {
        load_pages_from_dir(path)
    } else {
        load_pages_from_jsonl(path)
    }
}

fn trailing_number(stem: &str) -> Option<u32> {
    let end = stem.rfind(|c: char| c.is_ascii_digit())? + 1;
    let start = stem[..end].rfind(|c: char| !c.is_ascii_digit()).map_or(0, |i| i + 1);
    stem[start..end].parse().ok()
}

/// Chunks, embeds and indexes pages.
///
/// # Example
///
/// ```rust,ignore
/// let builder = IndexBuilder::new(config, Arc::new(RecursiveChunker::new(450, 50)?), embedder);
/// let index = builder.build_and_save(&pages, "vector_store/medical_index").await?;
/// ```
pub struct IndexBuilder {
    config: RagConfig,
    chunker: Arc<dyn Chunker>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
}

impl IndexBuilder {
    /// Create a builder.
    pub fn new(
        config: RagConfig,
        chunker: Arc<dyn Chunker>,
        embedding_provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self { config, chunker, embedding_provider }
    }

    /// Chunk every page, embed the chunks in batches and build the index.
    ///
    /// # Errors
    ///
    /// Propagates embedding failures, and returns [`RagError::Embedding`] if
    /// the provider returns the wrong number of vectors.
    pub async fn build(&self, documents: &[Document]) -> Result<FlatIndex> {
        let mut chunks = self.chunker.split(documents);
        info!(page_count = documents.len(), chunk_count = chunks.len(), "chunked pages");

        let batch_size = self.config.embed_batch_size.max(1);
        let mut batch_count = 0;
        for batch in chunks.chunks_mut(batch_size) {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let embeddings = self.embedding_provider.embed_batch(&texts).await.map_err(|e| {
                error!(batch = batch_count, error = %e, "embedding failed during indexing");
                e
            })?;
            if embeddings.len() != batch.len() {
                return Err(RagError::Embedding {
                    provider: self.embedding_provider.model_id().to_string(),
                    message: format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        embeddings.len()
                    ),
                });
            }
            for (chunk, embedding) in batch.iter_mut().zip(embeddings) {
                chunk.embedding = embedding;
            }
            batch_count += 1;
        }

        let index =
            FlatIndex::build(chunks, self.config.metric, self.embedding_provider.model_id())?;
        info!(chunk_count = index.chunks().len(), batch_count, "built index");
        Ok(index)
    }

    /// [`build`](IndexBuilder::build) and then save to `dir`.
    pub async fn build_and_save(
        &self,
        documents: &[Document],
        dir: impl AsRef<Path>,
    ) -> Result<FlatIndex> {
        let index = self.build(documents).await?;
        index.save(dir)?;
        Ok(index)
    }
}
