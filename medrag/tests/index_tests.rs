//! Property and persistence tests for the flat vector index.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use medrag::{
    Chunk, DiskContextLoader, FlatIndex, HashingEmbeddingProvider, Llm, Metric, RagError,
    RagPipeline, Result,
};
use proptest::prelude::*;

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map("non-zero embedding", |mut v| {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm < 1e-8 {
            return None;
        }
        for val in &mut v {
            *val /= norm;
        }
        Some(v)
    })
}

/// Generate the embeddings for a small index.
fn arb_embeddings(dim: usize) -> impl Strategy<Value = Vec<Vec<f32>>> {
    proptest::collection::vec(arb_normalized_embedding(dim), 1..20)
}

fn chunks_from(embeddings: Vec<Vec<f32>>) -> Vec<Chunk> {
    embeddings
        .into_iter()
        .enumerate()
        .map(|(i, embedding)| Chunk {
            id: format!("book:{}:{i}", i / 3 + 1),
            text: format!("chunk number {i}"),
            source_id: "book".to_string(),
            page_number: (i / 3 + 1) as u32,
            embedding,
            metadata: HashMap::new(),
        })
        .collect()
}

mod prop_flat_search {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// *For any* index and query, search returns exactly `min(k, N)`
        /// results with non-increasing scores, and repeating it gives the
        /// same ids in the same order.
        #[test]
        fn results_bounded_ordered_and_deterministic(
            embeddings in arb_embeddings(DIM),
            query in arb_normalized_embedding(DIM),
            top_k in 1usize..25,
            use_l2 in any::<bool>(),
        ) {
            let metric = if use_l2 { Metric::L2 } else { Metric::Cosine };
            let index = FlatIndex::build(chunks_from(embeddings), metric, "test-model").unwrap();
            let count = index.chunks().len();

            let results = index.nearest(&query, top_k).unwrap();
            prop_assert_eq!(results.len(), top_k.min(count));

            for window in results.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "scores not descending: {} < {}",
                    window[0].score,
                    window[1].score
                );
            }

            let again = index.nearest(&query, top_k).unwrap();
            let ids = |r: &[medrag::SearchResult]| r.iter().map(|r| r.chunk.id.clone()).collect::<Vec<_>>();
            prop_assert_eq!(ids(&results[..]), ids(&again[..]));
        }

        /// *For any* index, saving and loading it back yields the same
        /// search results.
        #[test]
        fn save_then_load_preserves_results(
            embeddings in arb_embeddings(DIM),
            query in arb_normalized_embedding(DIM),
        ) {
            let index = FlatIndex::build(chunks_from(embeddings), Metric::Cosine, "test-model").unwrap();
            let temp = tempfile::tempdir().unwrap();
            index.save(temp.path()).unwrap();
            let loaded = FlatIndex::load(temp.path()).unwrap();

            prop_assert_eq!(&loaded, &index);
            prop_assert_eq!(index.nearest(&query, 5).unwrap(), loaded.nearest(&query, 5).unwrap());
        }
    }
}

#[test]
fn identical_scores_keep_index_order() {
    let chunks = chunks_from(vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]]);
    let index = FlatIndex::build(chunks, Metric::Cosine, "test-model").unwrap();
    let results = index.nearest(&[1.0, 0.0], 2).unwrap();
    assert_eq!(results[0].chunk.id, "book:1:0");
    assert_eq!(results[1].chunk.id, "book:1:1");
}

#[test]
fn missing_directory_is_storage_error() {
    let temp = tempfile::tempdir().unwrap();
    let err = FlatIndex::load(temp.path().join("absent")).unwrap_err();
    assert!(matches!(err, RagError::Storage { .. }), "{err}");
}

#[test]
fn corrupt_artifacts_are_storage_errors() {
    let temp = tempfile::tempdir().unwrap();
    let index = FlatIndex::build(
        chunks_from(vec![vec![1.0, 0.0], vec![0.0, 1.0]]),
        Metric::Cosine,
        "test-model",
    )
    .unwrap();

    index.save(temp.path()).unwrap();
    fs::write(temp.path().join("chunks.jsonl"), "{\"id\": 3\n").unwrap();
    assert!(matches!(FlatIndex::load(temp.path()), Err(RagError::Storage { .. })));

    index.save(temp.path()).unwrap();
    let body = fs::read_to_string(temp.path().join("chunks.jsonl")).unwrap();
    let first_line = body.lines().next().unwrap();
    fs::write(temp.path().join("chunks.jsonl"), format!("{first_line}\n")).unwrap();
    let err = FlatIndex::load(temp.path()).unwrap_err();
    assert!(err.to_string().contains("manifest says 2"), "{err}");

    fs::write(temp.path().join("manifest.json"), "not json").unwrap();
    assert!(matches!(FlatIndex::load(temp.path()), Err(RagError::Storage { .. })));
}

struct Silent;

#[async_trait]
impl Llm for Silent {
    fn name(&self) -> &str {
        "silent"
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        Ok(String::new())
    }
}

#[tokio::test]
async fn disk_loader_reports_missing_index_as_not_ready() {
    let temp = tempfile::tempdir().unwrap();
    let embedder = Arc::new(HashingEmbeddingProvider::new(32).unwrap());
    let loader = DiskContextLoader::new(embedder, Arc::new(Silent), temp.path().join("index"));

    let err = RagPipeline::new(Arc::new(loader)).await.err().unwrap();
    assert!(matches!(err, RagError::IndexNotReady { .. }), "{err}");
}

#[tokio::test]
async fn disk_loader_rejects_index_from_another_model() {
    let temp = tempfile::tempdir().unwrap();
    FlatIndex::build(chunks_from(vec![vec![1.0; 32]]), Metric::Cosine, "some-other-model")
        .unwrap()
        .save(temp.path())
        .unwrap();

    let embedder = Arc::new(HashingEmbeddingProvider::new(32).unwrap());
    let loader = DiskContextLoader::new(embedder, Arc::new(Silent), temp.path());
    let err = RagPipeline::new(Arc::new(loader)).await.err().unwrap();
    assert!(matches!(err, RagError::Configuration(_)), "{err}");
}
