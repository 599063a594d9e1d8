//! Page chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two implementations:
//!
//! - [`RecursiveChunker`]: prefers paragraph, line, sentence and word boundaries
//!   and only cuts mid-word when a single word is larger than the chunk size
//! - [`FixedSizeChunker`]: plain character windows with configurable overlap
//!
//! Sizes are counted in characters, not bytes, so multi-byte text never gets
//! cut inside a code point.

use std::collections::VecDeque;

use crate::document::{Chunk, Document};
use crate::error::{RagError, Result};

/// Boundaries tried in order, coarsest first.
const SEPARATORS: [&str; 6] = ["\n\n", "\n", ". ", "! ", "? ", " "];

/// A strategy for splitting pages into chunks.
///
/// Implementations produce [`Chunk`]s with text and provenance but no
/// embeddings. Embeddings are attached later by the index builder.
pub trait Chunker: Send + Sync {
    /// Split a single page into chunks.
    ///
    /// Returns an empty `Vec` if the page has no non-whitespace text.
    /// Every returned chunk has an empty embedding vector.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;

    /// Split a sequence of pages, preserving page order.
    fn split(&self, documents: &[Document]) -> Vec<Chunk> {
        documents.iter().flat_map(|document| self.chunk(document)).collect()
    }
}

fn validate(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::Configuration("chunk_size must be greater than zero".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(RagError::Configuration(format!(
            "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Turn raw pieces into chunks: trim, drop blanks, number, tag with provenance.
fn into_chunks(document: &Document, pieces: Vec<String>) -> Vec<Chunk> {
    pieces
        .into_iter()
        .map(|piece| piece.trim().to_string())
        .filter(|piece| !piece.is_empty())
        .enumerate()
        .map(|(i, text)| {
            let mut metadata = document.metadata.clone();
            metadata.insert("chunk_index".to_string(), i.to_string());
            Chunk {
                id: format!("{}:{}:{i}", document.source_id, document.page_number),
                text,
                source_id: document.source_id.clone(),
                page_number: document.page_number,
                embedding: Vec::new(),
                metadata,
            }
        })
        .collect()
}

/// Splits text into fixed-size character windows with configurable overlap.
///
/// # Example
///
/// ```rust,ignore
/// use medrag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(256, 50)?;
/// let chunks = chunker.chunk(&page);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if `chunk_size` is zero or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        into_chunks(document, split_by_size(&document.text, self.chunk_size, self.chunk_overlap))
    }
}

/// Splits text hierarchically: paragraphs, lines, sentences, words, characters.
///
/// Text is first split at the coarsest separator it contains. Pieces that fit
/// are merged greedily up to `chunk_size`, carrying up to `chunk_overlap`
/// trailing characters into the next chunk. Pieces that are still too large
/// are split again with the next separator. Only a single word longer than
/// `chunk_size` is cut at character positions.
///
/// # Example
///
/// ```rust,ignore
/// use medrag::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(450, 50)?;
/// let chunks = chunker.split(&pages);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if `chunk_size` is zero or
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        if document.text.trim().is_empty() {
            return Vec::new();
        }
        let pieces =
            split_recursive(&document.text, self.chunk_size, self.chunk_overlap, &SEPARATORS);
        into_chunks(document, pieces)
    }
}

/// Split with the first separator present in `text`, recursing into pieces
/// that are still larger than `chunk_size`.
fn split_recursive(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    separators: &[&str],
) -> Vec<String> {
    if char_len(text) <= chunk_size {
        return vec![text.to_string()];
    }

    let Some(level) = separators.iter().position(|separator| text.contains(separator)) else {
        return split_by_size(text, chunk_size, chunk_overlap);
    };
    let remaining_separators = &separators[level + 1..];

    let mut pieces = Vec::new();
    let mut pending: Vec<&str> = Vec::new();

    for segment in split_keeping_separator(text, separators[level]) {
        if char_len(segment) <= chunk_size {
            pending.push(segment);
            continue;
        }
        if !pending.is_empty() {
            pieces.extend(merge_segments(&pending, chunk_size, chunk_overlap));
            pending.clear();
        }
        pieces.extend(split_recursive(segment, chunk_size, chunk_overlap, remaining_separators));
    }

    if !pending.is_empty() {
        pieces.extend(merge_segments(&pending, chunk_size, chunk_overlap));
    }

    pieces
}

/// Greedily merge segments (each at most `chunk_size`) into pieces of at most
/// `chunk_size` characters, starting each new piece with the trailing
/// segments of the previous one as long as they fit in `chunk_overlap`.
fn merge_segments(segments: &[&str], chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0;

    for &segment in segments {
        let len = char_len(segment);
        if total + len > chunk_size && !window.is_empty() {
            pieces.push(window.iter().map(|(s, _)| *s).collect::<String>());
            while total > chunk_overlap || (total + len > chunk_size && total > 0) {
                let Some((_, dropped)) = window.pop_front() else {
                    break;
                };
                total -= dropped;
            }
        }
        window.push_back((segment, len));
        total += len;
    }

    if !window.is_empty() {
        pieces.push(window.iter().map(|(s, _)| *s).collect::<String>());
    }

    pieces
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

/// Character windows of `chunk_size` advancing by `chunk_size - chunk_overlap`.
fn split_by_size(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let step = chunk_size.saturating_sub(chunk_overlap).max(1);
    let mut pieces = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + chunk_size).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    pieces
}
