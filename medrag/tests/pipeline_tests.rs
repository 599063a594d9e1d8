//! End-to-end tests for the question-answering pipeline with a keyword model.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use medrag::prompt::{APOLOGY_ANSWER, NO_CONTEXT_ANSWER, NO_RELEVANT_INFORMATION, NOT_SURE_ANSWER};
use medrag::{
    AnswerStatus, ChainConfig, DiskContextLoader, Document, EmbeddingProvider, FlatIndex,
    HashingEmbeddingProvider, IndexBuilder, Llm, Metric, RagConfig, RagContext, RagError,
    RagPipeline, RecursiveChunker, Result, VectorStore,
};

const STOPWORDS: &[&str] = &["what", "used", "how", "does", "with", "treat"];

/// Extracts chunk text that shares a content word with the question, and
/// combines by echoing every relevant extraction.
#[derive(Default)]
struct KeywordModel {
    calls: AtomicUsize,
}

impl KeywordModel {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn between<'a>(text: &'a str, start: &str, end: &str) -> &'a str {
    let from = text.find(start).map_or(0, |i| i + start.len());
    let to = text[from..].find(end).map_or(text.len(), |i| from + i);
    &text[from..to]
}

fn keywords(question: &str) -> Vec<String> {
    question
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() > 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

#[async_trait]
impl Llm for KeywordModel {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let question = between(prompt, "Question: ", "\n");

        if prompt.contains("Information:\n") {
            let information = between(prompt, "Information:\n", "\n\nQuestion:");
            let relevant: Vec<&str> = information
                .split("\n\n")
                .filter(|line| line.trim() != NO_RELEVANT_INFORMATION)
                .collect();
            return Ok(if relevant.is_empty() {
                NOT_SURE_ANSWER.to_string()
            } else {
                relevant.join(" ")
            });
        }

        let text = between(prompt, "Text: '", "'\n");
        let lower = text.to_lowercase();
        if keywords(question).iter().any(|k| lower.contains(k.as_str())) {
            Ok(text.to_string())
        } else {
            Ok(NO_RELEVANT_INFORMATION.to_string())
        }
    }
}

/// A model whose every call fails.
struct Broken;

#[async_trait]
impl Llm for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(RagError::Generation { model: "broken".into(), message: "out of memory".into() })
    }
}

/// A model that never answers within a minute.
struct Stalled;

#[async_trait]
impl Llm for Stalled {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(NO_RELEVANT_INFORMATION.to_string())
    }
}

fn medical_pages() -> Vec<Document> {
    vec![
        Document::new(
            "gale",
            12,
            "Aspirin is used to reduce fever and relieve mild pain. Aspirin also thins the blood.",
        ),
        Document::new("gale", 40, "The heart pumps blood through arteries and veins."),
        Document::new("gale", 77, "Bones are made of calcium and collagen."),
    ]
}

fn embedder() -> Arc<HashingEmbeddingProvider> {
    Arc::new(HashingEmbeddingProvider::new(256).unwrap())
}

async fn build_index(pages: &[Document], embedder: Arc<HashingEmbeddingProvider>) -> FlatIndex {
    let config = RagConfig::default();
    let chunker = Arc::new(RecursiveChunker::new(config.chunk_size, config.chunk_overlap).unwrap());
    IndexBuilder::new(config, chunker, embedder).build(pages).await.unwrap()
}

async fn pipeline_with(llm: Arc<dyn Llm>, top_k: usize) -> RagPipeline {
    let embedder = embedder();
    let index = build_index(&medical_pages(), embedder.clone()).await;
    let context = RagContext::builder()
        .embedding_provider(embedder)
        .llm(llm)
        .vector_store(Arc::new(index))
        .top_k(top_k)
        .build()
        .unwrap();
    RagPipeline::from_context(context)
}

#[tokio::test]
async fn answers_aspirin_question_from_its_page() {
    let model = Arc::new(KeywordModel::default());
    let pipeline = pipeline_with(model.clone(), 1).await;

    let response = pipeline.ask("What is aspirin used for?").await.unwrap();

    assert_eq!(response.status, AnswerStatus::Answered);
    assert!(response.answer.to_lowercase().contains("aspirin"), "{}", response.answer);
    assert_eq!(response.retrieved_chunks.len(), 1);
    assert_eq!(response.retrieved_chunks[0].chunk.page_number, 12);
    // One extraction plus one combine.
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn fever_question_retrieves_the_aspirin_chunk() {
    let model = Arc::new(KeywordModel::default());
    let embedder = embedder();
    let mut pages = medical_pages();
    pages[0] = Document::new("p12", 12, "Aspirin reduces fever and inflammation.");
    let index = build_index(&pages, embedder.clone()).await;
    let context = RagContext::builder()
        .embedding_provider(embedder)
        .llm(model)
        .vector_store(Arc::new(index))
        .top_k(1)
        .build()
        .unwrap();

    let response = RagPipeline::from_context(context).ask("What reduces fever?").await.unwrap();

    assert_eq!(response.retrieved_chunks[0].chunk.source_id, "p12");
    assert!(response.answer.contains("Aspirin"), "{}", response.answer);
    assert_ne!(response.answer, NOT_SURE_ANSWER);
}

#[tokio::test]
async fn unknown_topic_gets_fixed_not_sure_answer() {
    let model = Arc::new(KeywordModel::default());
    let pipeline = pipeline_with(model.clone(), 3).await;

    let response = pipeline.ask("How to treat diabetes?").await.unwrap();

    assert_eq!(response.answer, "I am not sure based on the available information.");
    assert_eq!(response.status, AnswerStatus::Unknown);
    assert_eq!(response.retrieved_chunks.len(), 3);
    // Three extractions, no combine call.
    assert_eq!(model.calls(), 3);
}

#[tokio::test]
async fn empty_index_skips_the_model() {
    let model = Arc::new(KeywordModel::default());
    let embedder = embedder();
    let index = FlatIndex::build(Vec::new(), Metric::Cosine, embedder.model_id()).unwrap();
    let context = RagContext::builder()
        .embedding_provider(embedder)
        .llm(model.clone())
        .vector_store(Arc::new(index))
        .build()
        .unwrap();
    let pipeline = RagPipeline::from_context(context);

    let response = pipeline.ask("What is aspirin used for?").await.unwrap();

    assert_eq!(response.answer, NO_CONTEXT_ANSWER);
    assert_eq!(response.status, AnswerStatus::NoContext);
    assert!(response.retrieved_chunks.is_empty());
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn blank_question_is_rejected_before_retrieval() {
    let model = Arc::new(KeywordModel::default());
    let pipeline = pipeline_with(model.clone(), 3).await;

    let err = pipeline.ask("   ").await.unwrap_err();
    assert!(matches!(err, RagError::InvalidArgument(_)));
    assert!(err.is_per_query());

    let degraded = pipeline.ask_or_apologize("   ").await;
    assert_eq!(degraded.status, AnswerStatus::Degraded);
    assert!(degraded.retrieved_chunks.is_empty());
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn generation_failure_degrades_to_apology() {
    let pipeline = pipeline_with(Arc::new(Broken), 2).await;

    let err = pipeline.ask("What is aspirin used for?").await.unwrap_err();
    assert!(matches!(err, RagError::Generation { .. }));

    let response = pipeline.ask_or_apologize("What is aspirin used for?").await;
    assert_eq!(response.answer, APOLOGY_ANSWER);
    assert_eq!(response.status, AnswerStatus::Degraded);
    assert_eq!(response.retrieved_chunks.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn stalled_model_times_out_and_degrades() {
    let embedder = embedder();
    let index = build_index(&medical_pages(), embedder.clone()).await;
    let context = RagContext::builder()
        .embedding_provider(embedder)
        .llm(Arc::new(Stalled))
        .vector_store(Arc::new(index))
        .top_k(2)
        .chain_config(ChainConfig {
            generation_timeout: Some(Duration::from_secs(1)),
            ..ChainConfig::default()
        })
        .build()
        .unwrap();
    let pipeline = RagPipeline::from_context(context);

    let err = pipeline.ask("What is aspirin used for?").await.unwrap_err();
    assert!(err.to_string().contains("timed out"), "{err}");

    let response = pipeline.ask_or_apologize("What is aspirin used for?").await;
    assert_eq!(response.answer, APOLOGY_ANSWER);
    assert_eq!(response.status, AnswerStatus::Degraded);
    assert_eq!(response.retrieved_chunks.len(), 2);
}

#[tokio::test]
async fn concurrent_questions_share_one_pipeline() {
    let model = Arc::new(KeywordModel::default());
    let pipeline = Arc::new(pipeline_with(model.clone(), 1).await);

    let handles: Vec<_> = ["What is aspirin used for?", "What pumps blood?", "Calcium in bones?"]
        .into_iter()
        .map(|question| {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.ask(question).await })
        })
        .collect();

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.retrieved_chunks.len(), 1);
    }
}

#[tokio::test]
async fn reset_picks_up_rebuilt_index_and_survives_failure() {
    let temp = tempfile::tempdir().unwrap();
    let dir = temp.path().join("medical_index");
    let embedder = embedder();
    let model = Arc::new(KeywordModel::default());

    build_index(&medical_pages()[..1], embedder.clone()).await.save(&dir).unwrap();
    let loader = DiskContextLoader::new(embedder.clone(), model.clone(), &dir).with_top_k(3);
    let pipeline = RagPipeline::new(Arc::new(loader)).await.unwrap();
    assert_eq!(pipeline.context().await.vector_store().len(), 1);

    build_index(&medical_pages(), embedder.clone()).await.save(&dir).unwrap();
    pipeline.reset().await.unwrap();
    assert_eq!(pipeline.context().await.vector_store().len(), 3);

    let response = pipeline.ask("Which bones contain calcium?").await.unwrap();
    assert!(response.answer.contains("calcium"), "{}", response.answer);

    std::fs::remove_dir_all(&dir).unwrap();
    let err = pipeline.reset().await.unwrap_err();
    assert!(matches!(err, RagError::IndexNotReady { .. }));
    assert_eq!(pipeline.context().await.vector_store().len(), 3);
}
