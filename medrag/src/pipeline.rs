//! Question-answering facade.
//!
//! A [`RagPipeline`] owns one [`RagContext`]: the embedding provider, the
//! generative model, the loaded index and the chain built on top of them.
//! The context is loaded eagerly by a [`ContextLoader`] when the pipeline is
//! created and reused by every [`ask`](RagPipeline::ask) call.
//! [`reset`](RagPipeline::reset) loads a fresh context and swaps it in.
//!
//! # Example
//!
//! ```rust,ignore
//! use medrag::{DiskContextLoader, RagPipeline};
//!
//! let loader = DiskContextLoader::new(embedder, llm, "vector_store/medical_index");
//! let pipeline = RagPipeline::new(Arc::new(loader)).await?;
//! let response = pipeline.ask("What reduces fever?").await?;
//! println!("{}", response.answer);
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::chain::{ChainConfig, MapReduceChain};
use crate::document::{AnswerResponse, AnswerStatus, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::flat::FlatIndex;
use crate::llm::Llm;
use crate::prompt::{APOLOGY_ANSWER, NO_CONTEXT_ANSWER};
use crate::retriever::{DEFAULT_TOP_K, Retriever};
use crate::vectorstore::VectorStore;

/// Everything a query needs, loaded once and shared read-only.
#[derive(Clone)]
pub struct RagContext {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn Llm>,
    vector_store: Arc<dyn VectorStore>,
    retriever: Retriever,
    chain: Arc<MapReduceChain>,
}

impl RagContext {
    /// Create a new [`RagContextBuilder`].
    pub fn builder() -> RagContextBuilder {
        RagContextBuilder::default()
    }

    /// The embedding provider used for questions.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// The generative model.
    pub fn llm(&self) -> &Arc<dyn Llm> {
        &self.llm
    }

    /// The loaded index.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector_store
    }

    /// The retrieval policy.
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// The answer-composition chain.
    pub fn chain(&self) -> &MapReduceChain {
        &self.chain
    }
}

/// Builder for constructing a [`RagContext`].
///
/// The embedding provider, model and vector store are required. `top_k`
/// defaults to 3 and the chain to [`ChainConfig::default`].
#[derive(Default)]
pub struct RagContextBuilder {
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    llm: Option<Arc<dyn Llm>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    top_k: Option<usize>,
    chain_config: Option<ChainConfig>,
}

impl RagContextBuilder {
    /// Set the embedding provider. Must be the one the index was built with.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the generative model.
    pub fn llm(mut self, llm: Arc<dyn Llm>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Set the index to search.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Set the number of chunks retrieved per question.
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    /// Set the chain prompts and limits.
    pub fn chain_config(mut self, config: ChainConfig) -> Self {
        self.chain_config = Some(config);
        self
    }

    /// Build the [`RagContext`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if a required field is missing or
    /// `top_k` is zero.
    pub fn build(self) -> Result<RagContext> {
        let embedding_provider = self.embedding_provider.ok_or_else(|| {
            RagError::Configuration("embedding_provider is required".to_string())
        })?;
        let llm = self.llm.ok_or_else(|| RagError::Configuration("llm is required".to_string()))?;
        let vector_store = self
            .vector_store
            .ok_or_else(|| RagError::Configuration("vector_store is required".to_string()))?;

        let retriever = Retriever::new(
            Arc::clone(&embedding_provider),
            Arc::clone(&vector_store),
            self.top_k.unwrap_or(DEFAULT_TOP_K),
        )?;
        let chain =
            Arc::new(MapReduceChain::new(Arc::clone(&llm), self.chain_config.unwrap_or_default()));

        Ok(RagContext { embedding_provider, llm, vector_store, retriever, chain })
    }
}

/// Produces a ready [`RagContext`], at startup and on every reset.
#[async_trait]
pub trait ContextLoader: Send + Sync {
    /// Load models and index.
    ///
    /// # Errors
    ///
    /// Any failure means there is no usable context.
    async fn load(&self) -> Result<RagContext>;
}

/// Hands out a context that was assembled up front.
pub struct StaticContextLoader {
    context: RagContext,
}

impl StaticContextLoader {
    /// Wrap an existing context.
    pub fn new(context: RagContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ContextLoader for StaticContextLoader {
    async fn load(&self) -> Result<RagContext> {
        Ok(self.context.clone())
    }
}

/// Pairs already-loaded models with an index read from disk on every load.
///
/// A reset therefore picks up an index rebuilt in place by the ingestion
/// step.
pub struct DiskContextLoader {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn Llm>,
    index_dir: PathBuf,
    top_k: usize,
    chain_config: ChainConfig,
}

impl DiskContextLoader {
    /// Create a loader for the index at `index_dir`.
    pub fn new(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn Llm>,
        index_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            embedding_provider,
            llm,
            index_dir: index_dir.into(),
            top_k: DEFAULT_TOP_K,
            chain_config: ChainConfig::default(),
        }
    }

    /// Set the number of chunks retrieved per question.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the chain prompts and limits.
    pub fn with_chain_config(mut self, config: ChainConfig) -> Self {
        self.chain_config = config;
        self
    }
}

#[async_trait]
impl ContextLoader for DiskContextLoader {
    async fn load(&self) -> Result<RagContext> {
        let index = load_index_for(&self.index_dir, self.embedding_provider.as_ref())?;
        RagContext::builder()
            .embedding_provider(Arc::clone(&self.embedding_provider))
            .llm(Arc::clone(&self.llm))
            .vector_store(Arc::new(index))
            .top_k(self.top_k)
            .chain_config(self.chain_config.clone())
            .build()
    }
}

/// Load the index at `dir` and check it was built with `provider`.
///
/// # Errors
///
/// Returns [`RagError::IndexNotReady`] if nothing was saved at `dir`,
/// [`RagError::Storage`] if the artifact is corrupt, and
/// [`RagError::Configuration`] if the embedding model or dimensionality
/// differs from `provider`.
pub fn load_index_for(
    dir: impl Into<PathBuf>,
    provider: &dyn EmbeddingProvider,
) -> Result<FlatIndex> {
    let dir = dir.into();
    if !FlatIndex::exists(&dir) {
        return Err(RagError::IndexNotReady { path: dir });
    }
    let index = FlatIndex::load(&dir)?;

    if index.embedding_model() != provider.model_id() {
        return Err(RagError::Configuration(format!(
            "index at {} was built with embedding model '{}', but the provider is '{}'",
            dir.display(),
            index.embedding_model(),
            provider.model_id()
        )));
    }
    if !index.is_empty() && index.dimensions() != provider.dimensions() {
        return Err(RagError::Configuration(format!(
            "index at {} has {} dimensions, but the provider produces {}",
            dir.display(),
            index.dimensions(),
            provider.dimensions()
        )));
    }

    info!(path = %dir.display(), chunk_count = index.len(), "index loaded");
    Ok(index)
}

/// The question-answering entry point.
///
/// Share one pipeline across request handlers, e.g. behind an `Arc`. Queries
/// only hold the context lock long enough to clone an `Arc`, so a
/// [`reset`](RagPipeline::reset) never waits for in-flight answers.
pub struct RagPipeline {
    loader: Arc<dyn ContextLoader>,
    context: RwLock<Arc<RagContext>>,
}

impl RagPipeline {
    /// Load the context through `loader` and return a ready pipeline.
    ///
    /// # Errors
    ///
    /// Propagates the loader's error; no pipeline is created.
    pub async fn new(loader: Arc<dyn ContextLoader>) -> Result<Self> {
        let context = loader.load().await.map_err(|e| {
            error!(error = %e, "pipeline initialization failed");
            e
        })?;
        info!(
            chunk_count = context.vector_store.len(),
            model = context.llm.name(),
            embedding_model = context.embedding_provider.model_id(),
            "pipeline ready"
        );
        Ok(Self { loader, context: RwLock::new(Arc::new(context)) })
    }

    /// Create a pipeline from an already assembled context.
    pub fn from_context(context: RagContext) -> Self {
        let loader = Arc::new(StaticContextLoader::new(context.clone()));
        Self { loader, context: RwLock::new(Arc::new(context)) }
    }

    /// The context currently serving queries.
    pub async fn context(&self) -> Arc<RagContext> {
        Arc::clone(&*self.context.read().await)
    }

    /// Answer `question` from the indexed document.
    ///
    /// When retrieval finds nothing, the chain is skipped and the answer is
    /// the fixed "could not find" message with no chunks.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] for a blank question, and
    /// embedding or generation errors raised while answering.
    pub async fn ask(&self, question: &str) -> Result<AnswerResponse> {
        let context = self.context().await;
        let retrieved = context.retriever.retrieve(question).await?;
        let (answer, status) = compose(&context, question, &retrieved).await?;
        Ok(AnswerResponse { answer, retrieved_chunks: retrieved, status })
    }

    /// Like [`ask`](RagPipeline::ask), but never fails.
    ///
    /// Errors are logged and turned into a fixed apology with
    /// [`AnswerStatus::Degraded`], keeping whatever chunks were retrieved.
    pub async fn ask_or_apologize(&self, question: &str) -> AnswerResponse {
        let context = self.context().await;
        let retrieved = match context.retriever.retrieve(question).await {
            Ok(retrieved) => retrieved,
            Err(e) => return apology(&e, Vec::new()),
        };
        match compose(&context, question, &retrieved).await {
            Ok((answer, status)) => AnswerResponse { answer, retrieved_chunks: retrieved, status },
            Err(e) => apology(&e, retrieved),
        }
    }

    /// Discard the current context and load a new one.
    ///
    /// The swap is atomic: queries already running finish on the old
    /// context, later ones see the new one.
    ///
    /// # Errors
    ///
    /// Returns the loader's error; the previous context stays in service.
    pub async fn reset(&self) -> Result<()> {
        let fresh = self.loader.load().await.map_err(|e| {
            error!(error = %e, "pipeline reset failed; keeping previous context");
            e
        })?;
        let chunk_count = fresh.vector_store.len();
        *self.context.write().await = Arc::new(fresh);
        info!(chunk_count, "pipeline reset");
        Ok(())
    }
}

async fn compose(
    context: &RagContext,
    question: &str,
    retrieved: &[SearchResult],
) -> Result<(String, AnswerStatus)> {
    if retrieved.is_empty() {
        info!("no chunks retrieved; skipping chain");
        return Ok((NO_CONTEXT_ANSWER.to_string(), AnswerStatus::NoContext));
    }
    let output = context.chain.run(question, retrieved).await?;
    Ok((output.answer, output.status))
}

fn apology(error: &RagError, retrieved: Vec<SearchResult>) -> AnswerResponse {
    if error.is_per_query() {
        warn!(error = %error, "query failed; answering with apology");
    } else {
        error!(error = %error, "query failed; answering with apology");
    }
    AnswerResponse {
        answer: APOLOGY_ANSWER.to_string(),
        retrieved_chunks: retrieved,
        status: AnswerStatus::Degraded,
    }
}
