//! Map-reduce answer composition.
//!
//! Each query moves through [`ChainState::Mapping`], [`ChainState::Reducing`]
//! and [`ChainState::Done`] exactly once. There are no retries and nothing is
//! kept between queries.
//!
//! - **Mapping**: one extraction call per retrieved chunk, all in flight at
//!   once. Outputs that amount to [`NO_RELEVANT_INFORMATION`] are flagged
//!   as not relevant.
//! - **Reducing**: the extractions, in chunk order, go into a single combine
//!   call. When nothing relevant was extracted the combine step answers
//!   [`NOT_SURE_ANSWER`] itself unless `short_circuit_unknown` is off.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::document::{AnswerStatus, SearchResult};
use crate::error::{RagError, Result};
use crate::llm::Llm;
use crate::prompt::{NO_RELEVANT_INFORMATION, NOT_SURE_ANSWER, PromptTemplate, is_no_information};

/// Where a query is in the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// Per-chunk extraction.
    Mapping,
    /// Single synthesis over all extractions.
    Reducing,
    /// The answer is ready.
    Done,
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Mapping => "mapping",
            Self::Reducing => "reducing",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Prompts and limits for the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainConfig {
    /// Extraction prompt; `{text}` is the chunk, `{input}` the question.
    pub map_prompt: PromptTemplate,
    /// Combine prompt; `{text}` is the joined extractions, `{input}` the question.
    pub combine_prompt: PromptTemplate,
    /// Upper bound on every single model call.
    pub generation_timeout: Option<Duration>,
    /// Answer [`NOT_SURE_ANSWER`] without a model call when no extraction is relevant.
    pub short_circuit_unknown: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            map_prompt: PromptTemplate::map_default(),
            combine_prompt: PromptTemplate::combine_default(),
            generation_timeout: None,
            short_circuit_unknown: true,
        }
    }
}

/// The extraction produced for one chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MapOutput {
    /// The chunk the extraction was run on.
    pub chunk_id: String,
    /// The trimmed model output.
    pub text: String,
    /// False when the output is the "nothing found" sentinel or empty.
    pub relevant: bool,
}

/// The result of a full chain run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutput {
    /// The final answer.
    pub answer: String,
    /// `Answered` or `Unknown`.
    pub status: AnswerStatus,
    /// The per-chunk extractions, in chunk order.
    pub extractions: Vec<MapOutput>,
}

/// Runs extraction over retrieved chunks and combines the results.
pub struct MapReduceChain {
    llm: Arc<dyn Llm>,
    config: ChainConfig,
}

impl MapReduceChain {
    /// Create a chain calling `llm` with the given prompts.
    pub fn new(llm: Arc<dyn Llm>, config: ChainConfig) -> Self {
        Self { llm, config }
    }

    /// The chain configuration.
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Answer `question` from `results`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] if `results` is empty, and
    /// [`RagError::Generation`] if any model call fails, times out, or the
    /// combine step returns nothing.
    pub async fn run(&self, question: &str, results: &[SearchResult]) -> Result<ChainOutput> {
        if results.is_empty() {
            return Err(RagError::InvalidArgument("no chunks to answer from".to_string()));
        }

        debug!(state = %ChainState::Mapping, chunk_count = results.len(), "chain step");
        let extractions = try_join_all(results.iter().map(|result| self.extract(question, result)))
            .await?;
        let relevant_count = extractions.iter().filter(|e| e.relevant).count();

        debug!(state = %ChainState::Reducing, relevant_count, "chain step");
        let (answer, status) = if relevant_count == 0 && self.config.short_circuit_unknown {
            (NOT_SURE_ANSWER.to_string(), AnswerStatus::Unknown)
        } else {
            let answer = self.combine(question, &extractions).await?;
            let status =
                if is_not_sure(&answer) { AnswerStatus::Unknown } else { AnswerStatus::Answered };
            (answer, status)
        };

        info!(
            state = %ChainState::Done,
            chunk_count = results.len(),
            relevant_count,
            status = ?status,
            "chain finished"
        );
        Ok(ChainOutput { answer, status, extractions })
    }

    async fn extract(&self, question: &str, result: &SearchResult) -> Result<MapOutput> {
        let prompt = self.config.map_prompt.render(&result.chunk.text, question);
        let output = self.generate(&prompt, ChainState::Mapping).await?;
        let text = output.trim().to_string();
        Ok(MapOutput { chunk_id: result.chunk.id.clone(), relevant: !is_no_information(&text), text })
    }

    async fn combine(&self, question: &str, extractions: &[MapOutput]) -> Result<String> {
        let joined = extractions
            .iter()
            .map(|e| if e.relevant { e.text.as_str() } else { NO_RELEVANT_INFORMATION })
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = self.config.combine_prompt.render(&joined, question);
        let answer = self.generate(&prompt, ChainState::Reducing).await?.trim().to_string();
        if answer.is_empty() {
            return Err(RagError::Generation {
                model: self.llm.name().to_string(),
                message: "combine step returned an empty answer".to_string(),
            });
        }
        Ok(answer)
    }

    async fn generate(&self, prompt: &str, state: ChainState) -> Result<String> {
        let model = self.llm.name();
        let call = self.llm.generate(prompt);
        let output = match self.config.generation_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                warn!(model, %state, ?limit, "generation timed out");
                RagError::Generation {
                    model: model.to_string(),
                    message: format!("{state} call timed out after {limit:?}"),
                }
            })?,
            None => call.await,
        };
        output.map_err(|e| match e {
            RagError::Generation { .. } => e,
            other => RagError::Generation { model: model.to_string(), message: other.to_string() },
        })
    }
}

fn is_not_sure(answer: &str) -> bool {
    let trim = |s: &str| s.trim().trim_end_matches('.').to_lowercase();
    trim(answer) == trim(NOT_SURE_ANSWER)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::document::Chunk;

    /// Replies from a queue and records every prompt it sees.
    struct Scripted {
        replies: Mutex<Vec<Result<String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String>>) -> Self {
            Self { replies: Mutex::new(replies), prompts: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl Llm for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies.lock().unwrap().remove(0)
        }
    }

    /// Answers only after a long pause.
    struct Sleepy(Duration);

    #[async_trait]
    impl Llm for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn generate(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(self.0).await;
            Ok("Aspirin reduces fever.".to_string())
        }
    }

    fn result(id: &str, text: &str) -> SearchResult {
        SearchResult {
            chunk: Chunk {
                id: id.to_string(),
                text: text.to_string(),
                source_id: "book".to_string(),
                page_number: 1,
                embedding: vec![1.0],
                metadata: HashMap::new(),
            },
            score: 1.0,
        }
    }

    #[tokio::test]
    async fn all_sentinels_short_circuit_to_not_sure() {
        let llm = Arc::new(Scripted::new(vec![
            Ok("No relevant information found.".to_string()),
            Ok("no relevant information found".to_string()),
        ]));
        let chain = MapReduceChain::new(llm.clone(), ChainConfig::default());
        let output =
            chain.run("How to treat diabetes?", &[result("a", "x"), result("b", "y")]).await.unwrap();
        assert_eq!(output.answer, NOT_SURE_ANSWER);
        assert_eq!(output.status, AnswerStatus::Unknown);
        assert_eq!(llm.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn combine_sees_extractions_in_chunk_order() {
        let llm = Arc::new(Scripted::new(vec![
            Ok("Aspirin reduces fever.".to_string()),
            Ok("No relevant information found.".to_string()),
            Ok("Aspirin.".to_string()),
        ]));
        let chain = MapReduceChain::new(llm.clone(), ChainConfig::default());
        let output = chain
            .run("What reduces fever?", &[result("a", "first"), result("b", "second")])
            .await
            .unwrap();
        assert_eq!(output.answer, "Aspirin.");
        assert_eq!(output.status, AnswerStatus::Answered);
        assert_eq!(
            output.extractions.iter().map(|e| e.relevant).collect::<Vec<_>>(),
            [true, false]
        );
        let prompts = llm.prompts.lock().unwrap();
        let combine = prompts.last().unwrap();
        assert!(combine.contains("Aspirin reduces fever.\n\nNo relevant information found."));
        assert!(combine.contains("Question: What reduces fever?"));
    }

    #[tokio::test]
    async fn model_failure_becomes_generation_error() {
        let llm = Arc::new(Scripted::new(vec![Err(RagError::InvalidArgument("boom".into()))]));
        let chain = MapReduceChain::new(llm, ChainConfig::default());
        let err = chain.run("q", &[result("a", "x")]).await.unwrap_err();
        assert!(matches!(err, RagError::Generation { ref model, .. } if model == "scripted"));
    }

    #[tokio::test]
    async fn empty_results_rejected() {
        let chain = MapReduceChain::new(Arc::new(Scripted::new(Vec::new())), ChainConfig::default());
        assert!(matches!(chain.run("q", &[]).await, Err(RagError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn prompt_driven_unknown_when_short_circuit_disabled() {
        let llm = Arc::new(Scripted::new(vec![
            Ok("No relevant information found.".to_string()),
            Ok("I am not sure based on the available information.".to_string()),
        ]));
        let config = ChainConfig { short_circuit_unknown: false, ..ChainConfig::default() };
        let output = MapReduceChain::new(llm.clone(), config)
            .run("q", &[result("a", "x")])
            .await
            .unwrap();
        assert_eq!(output.status, AnswerStatus::Unknown);
        assert_eq!(llm.prompts.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let config =
            ChainConfig { generation_timeout: Some(Duration::from_secs(1)), ..ChainConfig::default() };
        let chain = MapReduceChain::new(Arc::new(Sleepy(Duration::from_secs(30))), config);

        let err = chain.run("What reduces fever?", &[result("a", "x")]).await.unwrap_err();
        match err {
            RagError::Generation { model, message } => {
                assert_eq!(model, "sleepy");
                assert!(message.contains("timed out"), "{message}");
            }
            other => panic!("expected a generation error, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn model_within_limit_answers() {
        let config =
            ChainConfig { generation_timeout: Some(Duration::from_secs(5)), ..ChainConfig::default() };
        let chain = MapReduceChain::new(Arc::new(Sleepy(Duration::from_secs(1))), config);

        let output = chain.run("What reduces fever?", &[result("a", "x")]).await.unwrap();
        assert_eq!(output.answer, "Aspirin reduces fever.");
    }
}
