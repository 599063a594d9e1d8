//! Configuration for chunking, retrieval and the model backends.
//!
//! [`RagConfig`] holds the retrieval parameters and is validated by its
//! builder. [`AppConfig`] is the whole deployment: index location, providers
//! and generation limits. It is read from an optional TOML file and then
//! overridden by `MEDRAG_*` environment variables.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chain::ChainConfig;
use crate::error::{RagError, Result};
use crate::prompt::PromptTemplate;
use crate::retriever::DEFAULT_TOP_K;
use crate::vectorstore::Metric;

/// Configuration parameters for chunking and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Similarity metric used by the index.
    pub metric: Metric,
    /// Number of chunks sent to the embedding provider per request.
    pub embed_batch_size: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 450,
            chunk_overlap: 50,
            top_k: DEFAULT_TOP_K,
            metric: Metric::Cosine,
            embed_batch_size: 64,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `embed_batch_size == 0`
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Configuration("chunk_size must be greater than zero".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::Configuration("top_k must be greater than zero".to_string()));
        }
        if self.embed_batch_size == 0 {
            return Err(RagError::Configuration(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of chunks retrieved per question.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the similarity metric.
    pub fn metric(mut self, metric: Metric) -> Self {
        self.config.metric = metric;
        self
    }

    /// Set the embedding batch size used while building the index.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Which embedding backend to construct.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Offline lexical feature hashing.
    Hashing,
    /// An OpenAI-compatible `/embeddings` endpoint.
    #[default]
    OpenAI,
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hashing => f.write_str("hashing"),
            Self::OpenAI => f.write_str("openai"),
        }
    }
}

impl FromStr for EmbeddingBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hashing" => Ok(Self::Hashing),
            "openai" => Ok(Self::OpenAI),
            other => Err(RagError::Configuration(format!("unknown embedding backend '{other}'"))),
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Backend to use.
    pub backend: EmbeddingBackend,
    /// Base URL of the OpenAI-compatible server, up to and including `/v1`.
    pub base_url: String,
    /// Model name sent to the server.
    pub model: String,
    /// Environment variable holding the API key, if the server needs one.
    pub api_key_env: Option<String>,
    /// Vector size for the hashing backend; ignored by servers.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::OpenAI,
            base_url: "http://127.0.0.1:8081/v1".to_string(),
            model: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            api_key_env: None,
            dimensions: 384,
        }
    }
}

/// Generative model settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base URL of the OpenAI-compatible server, up to and including `/v1`.
    pub base_url: String,
    /// Model name sent to the server.
    pub model: String,
    /// Environment variable holding the API key, if the server needs one.
    pub api_key_env: Option<String>,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Per-call timeout in seconds; unset means no limit.
    pub timeout_secs: Option<u64>,
    /// Route every call through a single-slot lock.
    pub serialize_calls: bool,
    /// Answer "not sure" without a model call when nothing relevant was extracted.
    pub short_circuit_unknown: bool,
    /// Replacement extraction prompt; must contain `{text}`.
    pub map_prompt: Option<PromptTemplate>,
    /// Replacement combine prompt; must contain `{text}`.
    pub combine_prompt: Option<PromptTemplate>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/v1".to_string(),
            model: "google/flan-t5-base".to_string(),
            api_key_env: None,
            max_tokens: 512,
            temperature: 0.0,
            timeout_secs: Some(120),
            serialize_calls: false,
            short_circuit_unknown: true,
            map_prompt: None,
            combine_prompt: None,
        }
    }
}

/// Full deployment configuration.
///
/// # Example
///
/// ```toml
/// index_path = "vector_store/medical_index"
///
/// [rag]
/// chunk_size = 450
/// chunk_overlap = 50
/// top_k = 3
///
/// [embedding]
/// backend = "openai"
/// base_url = "http://127.0.0.1:8081/v1"
///
/// [generation]
/// model = "google/flan-t5-base"
/// timeout_secs = 60
/// map_prompt = "Copy the sentences about {input} from: {text}"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the saved index.
    pub index_path: PathBuf,
    /// Chunking and retrieval parameters.
    pub rag: RagConfig,
    /// Embedding provider settings.
    pub embedding: EmbeddingConfig,
    /// Generative model settings.
    pub generation: GenerationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from("vector_store/medical_index"),
            rag: RagConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read `path` if given, apply `MEDRAG_*` environment overrides, validate.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if the file cannot be read or
    /// parsed, an override does not parse, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        let config = config.with_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RagError::Configuration(format!("failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
            .map_err(|e| RagError::Configuration(format!("{}: {e}", path.display())))
    }

    /// Parse TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| RagError::Configuration(format!("invalid config: {e}")))
    }

    /// Apply overrides looked up by variable name.
    ///
    /// Recognised variables: `MEDRAG_INDEX_PATH`, `MEDRAG_CHUNK_SIZE`,
    /// `MEDRAG_CHUNK_OVERLAP`, `MEDRAG_TOP_K`, `MEDRAG_METRIC`,
    /// `MEDRAG_EMBEDDING_BACKEND`, `MEDRAG_EMBEDDING_URL`,
    /// `MEDRAG_EMBEDDING_MODEL`, `MEDRAG_LLM_URL`, `MEDRAG_LLM_MODEL`,
    /// `MEDRAG_LLM_TIMEOUT_SECS`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("MEDRAG_INDEX_PATH") {
            self.index_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("MEDRAG_CHUNK_SIZE") {
            self.rag.chunk_size = parse_var("MEDRAG_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = lookup("MEDRAG_CHUNK_OVERLAP") {
            self.rag.chunk_overlap = parse_var("MEDRAG_CHUNK_OVERLAP", &v)?;
        }
        if let Some(v) = lookup("MEDRAG_TOP_K") {
            self.rag.top_k = parse_var("MEDRAG_TOP_K", &v)?;
        }
        if let Some(v) = lookup("MEDRAG_METRIC") {
            self.rag.metric = v.parse()?;
        }
        if let Some(v) = lookup("MEDRAG_EMBEDDING_BACKEND") {
            self.embedding.backend = v.parse()?;
        }
        if let Some(v) = lookup("MEDRAG_EMBEDDING_URL") {
            self.embedding.base_url = v;
        }
        if let Some(v) = lookup("MEDRAG_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("MEDRAG_LLM_URL") {
            self.generation.base_url = v;
        }
        if let Some(v) = lookup("MEDRAG_LLM_MODEL") {
            self.generation.model = v;
        }
        if let Some(v) = lookup("MEDRAG_LLM_TIMEOUT_SECS") {
            let secs: u64 = parse_var("MEDRAG_LLM_TIMEOUT_SECS", &v)?;
            self.generation.timeout_secs = (secs > 0).then_some(secs);
        }
        debug!(index_path = %self.index_path.display(), "configuration resolved");
        Ok(self)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.rag.validate()?;
        if self.embedding.backend == EmbeddingBackend::Hashing && self.embedding.dimensions == 0 {
            return Err(RagError::Configuration(
                "embedding.dimensions must be greater than zero".to_string(),
            ));
        }
        if self.generation.max_tokens == 0 {
            return Err(RagError::Configuration(
                "generation.max_tokens must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Chain settings derived from the generation section.
    pub fn chain_config(&self) -> ChainConfig {
        let defaults = ChainConfig::default();
        ChainConfig {
            map_prompt: self.generation.map_prompt.clone().unwrap_or(defaults.map_prompt),
            combine_prompt: self
                .generation
                .combine_prompt
                .clone()
                .unwrap_or(defaults.combine_prompt),
            generation_timeout: self.generation.timeout_secs.map(Duration::from_secs),
            short_circuit_unknown: self.generation.short_circuit_unknown,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| RagError::Configuration(format!("{name}={value:?} is invalid: {e}")))
}
