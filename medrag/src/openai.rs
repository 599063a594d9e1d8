//! OpenAI-compatible HTTP providers.
//!
//! Local inference servers (llama.cpp `server`, Ollama, vLLM,
//! text-embeddings-inference) expose the OpenAI `/v1/embeddings` and
//! `/v1/chat/completions` routes, so one pair of clients covers them all.
//!
//! This module is only available when the `openai` feature is enabled.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::{AppConfig, EmbeddingBackend, EmbeddingConfig, GenerationConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::hashing::HashingEmbeddingProvider;
use crate::llm::{Llm, SerializedLlm};
use crate::pipeline::{ContextLoader, RagContext, load_index_for};

/// Text embedded once at connect time to learn the output dimensionality.
const DIMENSION_PROBE: &str = "dimension probe";

fn api_key_from(env: Option<&str>, provider: &str) -> Result<Option<String>> {
    match env {
        None => Ok(None),
        Some(var) => std::env::var(var).map(Some).map_err(|_| RagError::ModelLoad {
            provider: provider.to_string(),
            message: format!("{var} environment variable not set"),
        }),
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{path}", base_url.trim_end_matches('/'))
}

// ── API request/response types ─────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Read a non-success response body into a readable message.
async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail =
        serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);
    format!("API returned {status}: {detail}")
}

// ── Embeddings ─────────────────────────────────────────────────────

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible `/embeddings` route.
///
/// # Example
///
/// ```rust,ignore
/// use medrag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::connect(
///     "http://127.0.0.1:8081/v1",
///     "sentence-transformers/all-MiniLM-L6-v2",
///     None,
/// )
/// .await?;
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl OpenAIEmbeddingProvider {
    /// Connect to the server and learn the model's dimensionality.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ModelLoad`] if the server cannot be reached or
    /// does not serve the model.
    pub async fn connect(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let mut provider = Self {
            client: reqwest::Client::new(),
            url: endpoint(base_url, "embeddings"),
            api_key,
            model: model.into(),
            dimensions: 0,
        };

        let probe = provider.request(&[DIMENSION_PROBE]).await.map_err(|e| RagError::ModelLoad {
            provider: "OpenAI".into(),
            message: format!("embedding model '{}' unavailable: {e}", provider.model),
        })?;
        provider.dimensions = probe.first().map_or(0, Vec::len);
        if provider.dimensions == 0 {
            return Err(RagError::ModelLoad {
                provider: "OpenAI".into(),
                message: format!("embedding model '{}' returned an empty vector", provider.model),
            });
        }

        info!(model = %provider.model, dimensions = provider.dimensions, "embedding model ready");
        Ok(provider)
    }

    /// Connect using an [`EmbeddingConfig`].
    pub async fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = api_key_from(config.api_key_env.as_deref(), "OpenAI")?;
        Self::connect(&config.base_url, config.model.clone(), api_key).await
    }

    async fn request(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest { model: &self.model, input: texts.to_vec() };
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            error!(provider = "OpenAI", error = %e, "request failed");
            RagError::Embedding { provider: "OpenAI".into(), message: format!("request failed: {e}") }
        })?;

        if !response.status().is_success() {
            let message = error_detail(response).await;
            error!(provider = "OpenAI", %message, "API error");
            return Err(RagError::Embedding { provider: "OpenAI".into(), message });
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            error!(provider = "OpenAI", error = %e, "failed to parse response");
            RagError::Embedding {
                provider: "OpenAI".into(),
                message: format!("failed to parse response: {e}"),
            }
        })?;

        let mut data = parsed.data;
        // Servers may answer out of order; `index` restores input order.
        data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(provider = "OpenAI", text_len = text.len(), "embedding single text");

        let results = self.embed_batch(&[text]).await?;
        results.into_iter().next().ok_or_else(|| RagError::Embedding {
            provider: "OpenAI".into(),
            message: "API returned empty response".into(),
        })
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = "OpenAI", batch_size = texts.len(), model = %self.model, "embedding batch");

        let embeddings = self.request(texts).await?;
        if embeddings.len() != texts.len() {
            return Err(RagError::Embedding {
                provider: "OpenAI".into(),
                message: format!("expected {} embeddings, got {}", texts.len(), embeddings.len()),
            });
        }
        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ── Chat completions ───────────────────────────────────────────────

/// An [`Llm`] backed by an OpenAI-compatible `/chat/completions` route.
///
/// Each prompt is sent as a single user message; streaming is off.
pub struct OpenAIChatModel {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAIChatModel {
    /// Connect to the server and check that it answers `GET /models`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ModelLoad`] if the server is unreachable or
    /// rejects the request.
    pub async fn connect(config: &GenerationConfig) -> Result<Self> {
        let api_key = api_key_from(config.api_key_env.as_deref(), "OpenAI")?;
        let client = reqwest::Client::new();

        let mut probe = client.get(endpoint(&config.base_url, "models"));
        if let Some(key) = &api_key {
            probe = probe.bearer_auth(key);
        }
        let response = probe.send().await.map_err(|e| RagError::ModelLoad {
            provider: "OpenAI".into(),
            message: format!("generation server at {} unreachable: {e}", config.base_url),
        })?;
        if !response.status().is_success() {
            return Err(RagError::ModelLoad {
                provider: "OpenAI".into(),
                message: error_detail(response).await,
            });
        }

        info!(model = %config.model, base_url = %config.base_url, "generation model ready");
        Ok(Self {
            client,
            url: endpoint(&config.base_url, "chat/completions"),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn failure(&self, message: String) -> RagError {
        error!(model = %self.model, %message, "generation failed");
        RagError::Generation { model: self.model.clone(), message }
    }
}

#[async_trait]
impl Llm for OpenAIChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(model = %self.model, prompt_len = prompt.len(), "generating");

        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: prompt }],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: false,
        };
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response =
            request.send().await.map_err(|e| self.failure(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            let message = error_detail(response).await;
            return Err(self.failure(message));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| self.failure(format!("failed to parse response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| self.failure("response has no message content".to_string()))
    }
}

// ── Config-driven loading ──────────────────────────────────────────

/// Build the embedding provider named by `config`.
pub async fn embedding_provider_from_config(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.backend {
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbeddingProvider::new(config.dimensions)?)),
        EmbeddingBackend::OpenAI => Ok(Arc::new(OpenAIEmbeddingProvider::from_config(config).await?)),
    }
}

/// Build the generative model named by `config`.
pub async fn llm_from_config(config: &GenerationConfig) -> Result<Arc<dyn Llm>> {
    let model = OpenAIChatModel::connect(config).await?;
    if config.serialize_calls {
        Ok(Arc::new(SerializedLlm::new(model)))
    } else {
        Ok(Arc::new(model))
    }
}

/// Builds every component from an [`AppConfig`], from scratch on every load.
///
/// A reset therefore reconnects to both servers and re-reads the index.
pub struct ConfiguredContextLoader {
    config: AppConfig,
}

impl ConfiguredContextLoader {
    /// Create a loader for `config`.
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ContextLoader for ConfiguredContextLoader {
    async fn load(&self) -> Result<RagContext> {
        let embedding_provider = embedding_provider_from_config(&self.config.embedding).await?;
        let index = load_index_for(&self.config.index_path, embedding_provider.as_ref())?;
        let llm = llm_from_config(&self.config.generation).await?;

        RagContext::builder()
            .embedding_provider(embedding_provider)
            .llm(llm)
            .vector_store(Arc::new(index))
            .top_k(self.config.rag.top_k)
            .chain_config(self.config.chain_config())
            .build()
    }
}
