//! Generative model trait.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;

/// A text-to-text generative model.
///
/// Implementations must be safe to call from several tasks at once. Wrap a
/// runtime that is not reentrant in [`SerializedLlm`].
#[async_trait]
pub trait Llm: Send + Sync {
    /// Model identifier used in logs and errors.
    fn name(&self) -> &str;

    /// Generate a completion for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Generation`](crate::RagError::Generation) when the
    /// call fails.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Runs every call to the inner model through a single-slot lock.
///
/// # Example
///
/// ```rust,ignore
/// let llm = Arc::new(SerializedLlm::new(local_model));
/// ```
pub struct SerializedLlm<L> {
    inner: L,
    slot: Mutex<()>,
}

impl<L: Llm> SerializedLlm<L> {
    /// Wrap `inner` so that at most one generation runs at a time.
    pub fn new(inner: L) -> Self {
        Self { inner, slot: Mutex::new(()) }
    }

    /// Unwrap the inner model.
    pub fn into_inner(self) -> L {
        self.inner
    }
}

#[async_trait]
impl<L: Llm> Llm for SerializedLlm<L> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let _guard = self.slot.lock().await;
        self.inner.generate(prompt).await
    }
}
