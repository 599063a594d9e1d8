//! # medrag
//!
//! Retrieval-augmented question answering over a medical reference book.
//!
//! Pages extracted from the book are chunked, embedded and saved as a flat
//! vector index. At query time the question is embedded, the nearest chunks
//! are retrieved, and a map-reduce chain asks a language model to extract
//! relevant sentences from each chunk and combine them into one answer.
//!
//! ## Features
//!
//! - `openai`: OpenAI-compatible HTTP embedding and chat clients, usable
//!   with local inference servers.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use medrag::{
//!     DiskContextLoader, HashingEmbeddingProvider, IndexBuilder, RagConfig, RagPipeline,
//!     RecursiveChunker, load_pages,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RagConfig::default();
//!     let embedder = Arc::new(HashingEmbeddingProvider::new(384)?);
//!     let chunker = Arc::new(RecursiveChunker::new(config.chunk_size, config.chunk_overlap)?);
//!
//!     let pages = load_pages("pages/")?;
//!     IndexBuilder::new(config, chunker, embedder.clone())
//!         .build_and_save(&pages, "vector_store/medical_index")
//!         .await?;
//!
//!     let loader = DiskContextLoader::new(embedder, my_llm(), "vector_store/medical_index");
//!     let pipeline = RagPipeline::new(Arc::new(loader)).await?;
//!     let response = pipeline.ask("What is aspirin used for?").await?;
//!     println!("{}", response.answer);
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod flat;
pub mod hashing;
pub mod ingest;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod retriever;
pub mod vectorstore;

#[cfg(feature = "openai")]
pub mod openai;

pub use chain::{ChainConfig, ChainOutput, ChainState, MapOutput, MapReduceChain};
pub use chunking::{Chunker, FixedSizeChunker, RecursiveChunker};
pub use config::{
    AppConfig, EmbeddingBackend, EmbeddingConfig, GenerationConfig, RagConfig, RagConfigBuilder,
};
pub use document::{AnswerResponse, AnswerStatus, Chunk, Document, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use flat::FlatIndex;
pub use hashing::HashingEmbeddingProvider;
pub use ingest::{IndexBuilder, load_pages, load_pages_from_dir, load_pages_from_jsonl};
pub use llm::{Llm, SerializedLlm};
pub use pipeline::{
    ContextLoader, DiskContextLoader, RagContext, RagContextBuilder, RagPipeline,
    StaticContextLoader, load_index_for,
};
pub use prompt::PromptTemplate;
pub use retriever::{DEFAULT_TOP_K, Retriever};
pub use vectorstore::{Metric, VectorStore};

#[cfg(feature = "openai")]
pub use openai::{ConfiguredContextLoader, OpenAIChatModel, OpenAIEmbeddingProvider};
