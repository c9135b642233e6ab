use async_trait::async_trait;
use querygate_index::{IndexError, IndexPaths, SimilarityIndex};
use querygate_llm::{EmbeddingService, LlmError, MockEmbedder, TokenHashEmbedder};
use std::sync::Arc;

fn items(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(content, source)| (content.to_string(), source.to_string()))
        .collect()
}

fn cards() -> Vec<(String, String)> {
    items(&[
        (
            "TABLE: public.orders COLUMNS: id total customer_id created_at",
            "schema://public.orders",
        ),
        (
            "TABLE: public.customers COLUMNS: id name region",
            "schema://public.customers",
        ),
        (
            "METRIC CARD NAME: revenue DEFINITION: sum of order totals",
            "metric://revenue",
        ),
    ])
}

#[tokio::test]
async fn test_roundtrip_returns_all_when_k_covers_index() {
    let dir = tempfile::tempdir().unwrap();
    let index = SimilarityIndex::new(
        IndexPaths::in_dir(dir.path()),
        Arc::new(TokenHashEmbedder::new(64)),
    );
    assert_eq!(index.insert(&cards()).await.unwrap(), 3);

    let mut hits = index.query("anything at all", 10).await.unwrap();
    hits.sort();
    let mut expected: Vec<String> = cards().into_iter().map(|(c, _)| c).collect();
    expected.sort();
    assert_eq!(hits, expected);
}

#[tokio::test]
async fn test_identical_text_ranks_first() {
    let dir = tempfile::tempdir().unwrap();
    let index = SimilarityIndex::new(
        IndexPaths::in_dir(dir.path()),
        Arc::new(TokenHashEmbedder::default()),
    );
    index.insert(&cards()).await.unwrap();

    for (content, _) in cards() {
        let hits = index.query(&content, 1).await.unwrap();
        assert_eq!(hits, vec![content]);
    }
}

#[tokio::test]
async fn test_missing_artifacts_mean_empty() {
    let dir = tempfile::tempdir().unwrap();
    let paths = IndexPaths::in_dir(dir.path());
    let index = SimilarityIndex::new(paths.clone(), Arc::new(TokenHashEmbedder::default()));
    assert!(index.query("orders", 5).await.unwrap().is_empty());

    index.insert(&cards()).await.unwrap();
    std::fs::remove_file(&paths.metadata).unwrap();
    assert!(index.query("orders", 5).await.unwrap().is_empty());
    assert_eq!(index.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_item_is_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let bad = "TABLE: public.customers COLUMNS: id name region";
    let embedder = Arc::new(MockEmbedder::new(32).failing_on(bad));
    let index = SimilarityIndex::new(IndexPaths::in_dir(dir.path()), embedder);

    assert_eq!(index.insert(&cards()).await.unwrap(), 2);
    assert_eq!(index.len().await.unwrap(), 2);
    let hits = index.query("orders", 10).await.unwrap();
    assert!(!hits.iter().any(|h| h == bad));
}

#[tokio::test]
async fn test_inserts_accumulate_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let paths = IndexPaths::in_dir(dir.path());
    let first = SimilarityIndex::new(paths.clone(), Arc::new(TokenHashEmbedder::default()));
    first.insert(&cards()[..1]).await.unwrap();

    let second = SimilarityIndex::new(paths, Arc::new(TokenHashEmbedder::default()));
    second.insert(&cards()[1..]).await.unwrap();
    assert_eq!(second.len().await.unwrap(), 3);
}

#[tokio::test]
async fn test_concurrent_inserts_keep_pair_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let index = Arc::new(SimilarityIndex::new(
        IndexPaths::in_dir(dir.path()),
        Arc::new(TokenHashEmbedder::default()),
    ));

    let mut handles = Vec::new();
    for i in 0..8 {
        let index = Arc::clone(&index);
        handles.push(tokio::spawn(async move {
            let batch = vec![(format!("card number {i}"), format!("schema://public.t{i}"))];
            index.insert(&batch).await.unwrap()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 1);
    }
    assert_eq!(index.len().await.unwrap(), 8);
    assert_eq!(index.query("card", 100).await.unwrap().len(), 8);
}

struct VaryingDim;

#[async_trait]
impl EmbeddingService for VaryingDim {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(vec![1.0; if text.contains("wide") { 8 } else { 4 }])
    }

    fn describe(&self) -> String {
        "varying".to_string()
    }
}

#[tokio::test]
async fn test_dimension_is_fixed_by_probe() {
    let dir = tempfile::tempdir().unwrap();
    let index = SimilarityIndex::new(IndexPaths::in_dir(dir.path()), Arc::new(VaryingDim));
    let inserted = index
        .insert(&items(&[("narrow card", "a"), ("wide card", "b")]))
        .await
        .unwrap();
    assert_eq!(inserted, 1);
    assert!(matches!(
        index.query("wide question", 1).await,
        Err(IndexError::DimensionMismatch { expected: 4, got: 8 })
    ));
}
