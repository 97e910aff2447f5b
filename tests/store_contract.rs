#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

//! Behaviour every `VectorStore` adapter must share.
//!
//! The same cases run against the in-memory store and against SQLite on a
//! temporary directory.

use embedding_store::StoreError;
use embedding_store::database::{
    EmbeddingKey, MemoryVectorStore, NewEmbedding, SearchQuery, SqliteVectorStore, VectorStore,
    metadata_from,
};
use embedding_store::embeddings::{SimilarityMetric, VectorEncoder};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const DIMENSION: usize = 384;

#[expect(
    clippy::unused_async,
    reason = "store factories share one async signature for the contract macro"
)]
async fn memory_store() -> (Option<TempDir>, Arc<dyn VectorStore>) {
    (None, Arc::new(MemoryVectorStore::new()))
}

async fn sqlite_store() -> (Option<TempDir>, Arc<dyn VectorStore>) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = SqliteVectorStore::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("should open database");
    (Some(temp_dir), Arc::new(store))
}

fn padded(leading: &[f32]) -> Vec<f32> {
    let mut vector = vec![0.0; DIMENSION];
    vector[..leading.len()].copy_from_slice(leading);
    vector
}

fn article(content_id: &str, vector: Vec<f32>) -> NewEmbedding {
    NewEmbedding::new(content_id, "article", "m", vector)
}

macro_rules! store_contract {
    ($adapter:ident, $factory:ident) => {
        mod $adapter {
            use super::*;

            #[tokio::test]
            async fn query_finds_itself_with_high_score() {
                let (_guard, store) = $factory().await;
                let vectors = [
                    padded(&[0.3, -0.7, 0.2]),
                    padded(&[5.0, 5.0, 5.0, 5.0]),
                    padded(&[-1.0]),
                ];
                for (i, vector) in vectors.iter().enumerate() {
                    store
                        .store(article(&format!("v{}", i), vector.clone()))
                        .await
                        .expect("should store");
                }

                for vector in vectors {
                    let hits = store
                        .similarity_search(&SearchQuery::new(vector))
                        .await
                        .expect("should search");
                    assert!(hits[0].score >= 0.99, "top score {}", hits[0].score);
                }
            }

            #[tokio::test]
            async fn extreme_magnitude_vectors_find_themselves() {
                let (_guard, store) = $factory().await;
                let vectors = [
                    padded(&[1e20, 1e20]),
                    padded(&[1e-25, -1e-25]),
                    padded(&[f32::MAX, 0.0, -f32::MAX]),
                ];
                for (i, vector) in vectors.iter().enumerate() {
                    store
                        .store(article(&format!("extreme-{}", i), vector.clone()))
                        .await
                        .expect("should store");
                }

                for (i, vector) in vectors.into_iter().enumerate() {
                    for metric in [SimilarityMetric::Cosine, SimilarityMetric::Euclidean] {
                        let hits = store
                            .similarity_search(&SearchQuery::new(vector.clone()).metric(metric))
                            .await
                            .expect("should search");
                        assert_eq!(hits[0].content_id, format!("extreme-{}", i));
                        assert!(hits[0].score >= 0.99, "{} top score {}", metric, hits[0].score);
                    }
                }
            }

            #[tokio::test]
            async fn storing_same_key_twice_upserts() {
                let (_guard, store) = $factory().await;

                let first = store
                    .store(article("doc", padded(&[1.0])))
                    .await
                    .expect("should store");
                let second = store
                    .store(article("doc", padded(&[0.0, 1.0])))
                    .await
                    .expect("should upsert");
                assert_eq!(first, second);

                let stats = store.stats().await.expect("should compute stats");
                assert_eq!(stats.total_embeddings, 1);

                let record = store
                    .get("doc", Some("article"), Some("m"))
                    .await
                    .expect("should read")
                    .expect("record should exist");
                assert_eq!(record.vector(), padded(&[0.0, 1.0]).as_slice());
                assert!(record.updated_at >= record.created_at);
            }

            #[tokio::test]
            async fn delete_then_get_returns_none() {
                let (_guard, store) = $factory().await;
                store
                    .store(article("doc", padded(&[1.0])))
                    .await
                    .expect("should store");

                assert!(store
                    .delete("doc", Some("article"), Some("m"))
                    .await
                    .expect("should delete"));
                assert!(store
                    .get("doc", Some("article"), Some("m"))
                    .await
                    .expect("should read")
                    .is_none());
                assert!(!store
                    .delete("doc", Some("article"), Some("m"))
                    .await
                    .expect("second delete should not fail"));
            }

            #[tokio::test]
            async fn results_respect_threshold_and_top_k() {
                let (_guard, store) = $factory().await;
                let batch = (0..20)
                    .map(|i| {
                        let angle = i as f32 * 0.08;
                        article(&format!("doc-{:02}", i), padded(&[angle.cos(), angle.sin()]))
                    })
                    .collect();
                store.batch_store(batch).await.expect("should store batch");

                for threshold in [0.0, 0.5, 0.9, 0.99] {
                    let query = SearchQuery::new(padded(&[1.0]))
                        .top_k(100)
                        .min_similarity(threshold);
                    let hits = store.similarity_search(&query).await.expect("should search");
                    assert!(hits.iter().all(|hit| hit.score >= threshold));
                }

                for k in [1, 3, 7] {
                    let query = SearchQuery::new(padded(&[1.0])).top_k(k);
                    let hits = store.similarity_search(&query).await.expect("should search");
                    assert_eq!(hits.len(), k);
                    assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
                }
            }

            #[tokio::test]
            async fn cosine_ranking_of_three_documents() {
                let (_guard, store) = $factory().await;
                store
                    .batch_store(vec![
                        article("A", padded(&[1.0])),
                        article("B", padded(&[0.0, 1.0])),
                        article("C", padded(&[0.9, 0.1])),
                    ])
                    .await
                    .expect("should store batch");

                let query = SearchQuery::new(padded(&[1.0]))
                    .model_name("m")
                    .content_type("article")
                    .metric(SimilarityMetric::Cosine)
                    .top_k(2)
                    .min_similarity(0.5);
                let hits = store.similarity_search(&query).await.expect("should search");

                let ids: Vec<&str> = hits.iter().map(|hit| hit.content_id.as_str()).collect();
                assert_eq!(ids, ["A", "C"]);
                assert!((hits[0].score - 1.0).abs() < 1e-4);
                assert!((hits[1].score - 0.994).abs() < 1e-3);
            }

            #[tokio::test]
            async fn euclidean_scores_identical_vectors_as_one() {
                let (_guard, store) = $factory().await;
                store
                    .batch_store(vec![
                        article("near", padded(&[1.0, 1.0])),
                        article("far", padded(&[10.0, -10.0])),
                    ])
                    .await
                    .expect("should store batch");

                let query = SearchQuery::new(padded(&[1.0, 1.0])).metric(SimilarityMetric::Euclidean);
                let hits = store.similarity_search(&query).await.expect("should search");

                assert_eq!(hits[0].content_id, "near");
                assert!((hits[0].score - 1.0).abs() < 1e-6);
                assert!(hits[1].score < 0.1);
            }

            #[tokio::test]
            async fn equal_scores_are_ordered_by_content_id() {
                let (_guard, store) = $factory().await;
                for content_id in ["charlie", "alpha", "bravo"] {
                    store
                        .store(article(content_id, padded(&[1.0])))
                        .await
                        .expect("should store");
                }

                let hits = store
                    .similarity_search(&SearchQuery::new(padded(&[1.0])))
                    .await
                    .expect("should search");
                let ids: Vec<&str> = hits.iter().map(|hit| hit.content_id.as_str()).collect();
                assert_eq!(ids, ["alpha", "bravo", "charlie"]);
            }

            #[tokio::test]
            async fn search_only_scores_matching_model_and_dimension() {
                let (_guard, store) = $factory().await;
                store
                    .batch_store(vec![
                        article("same", padded(&[1.0])),
                        NewEmbedding::new("other-model", "article", "m2", padded(&[1.0])),
                        NewEmbedding::new("short", "article", "m", vec![1.0, 0.0]),
                        NewEmbedding::new("summary", "summary", "m", padded(&[1.0])),
                    ])
                    .await
                    .expect("should store batch");

                let query = SearchQuery::new(padded(&[1.0]))
                    .model_name("m")
                    .content_type("article");
                let hits = store.similarity_search(&query).await.expect("should search");
                let ids: Vec<&str> = hits.iter().map(|hit| hit.content_id.as_str()).collect();
                assert_eq!(ids, ["same"]);

                let unfiltered = store
                    .similarity_search(&SearchQuery::new(padded(&[1.0])))
                    .await
                    .expect("should search");
                assert_eq!(unfiltered.len(), 3);
            }

            #[tokio::test]
            async fn duplicate_key_in_batch_writes_nothing() {
                let (_guard, store) = $factory().await;

                let error = store
                    .batch_store(vec![
                        article("x", padded(&[1.0])),
                        article("y", padded(&[1.0])),
                        article("x", padded(&[0.0, 1.0])),
                    ])
                    .await
                    .expect_err("duplicate key should fail the batch");
                assert!(error.is_validation());

                let stats = store.stats().await.expect("should compute stats");
                assert_eq!(stats.total_embeddings, 0);
                assert!(store.get("y", None, None).await.expect("should read").is_none());
            }

            #[tokio::test]
            async fn batch_skips_invalid_entries() {
                let (_guard, store) = $factory().await;

                let ids = store
                    .batch_store(vec![
                        article("good", padded(&[1.0])),
                        article("empty", Vec::new()),
                        article("nan", vec![f32::NAN, 1.0]),
                        article("also-good", padded(&[0.0, 1.0])),
                    ])
                    .await
                    .expect("batch should succeed");
                assert_eq!(ids.len(), 2);

                let stats = store.stats().await.expect("should compute stats");
                assert_eq!(stats.total_embeddings, 2);
            }

            #[tokio::test]
            async fn invalid_input_is_rejected() {
                let (_guard, store) = $factory().await;

                for embedding in [
                    article("empty", Vec::new()),
                    article("inf", vec![1.0, f32::INFINITY]),
                    article("declared", vec![1.0, 2.0]).with_embedding_dim(3),
                    NewEmbedding::new("", "article", "m", vec![1.0]),
                ] {
                    let error = store
                        .store(embedding)
                        .await
                        .expect_err("invalid embedding should fail");
                    assert!(error.is_validation(), "unexpected error {}", error);
                }

                let error = store
                    .similarity_search(&SearchQuery::new(padded(&[1.0])).top_k(0))
                    .await
                    .expect_err("top_k of zero should fail");
                assert!(error.is_validation());

                let error = store
                    .similarity_search(&SearchQuery::new(Vec::new()))
                    .await
                    .expect_err("empty query should fail");
                assert!(error.is_validation());
            }

            #[tokio::test]
            async fn average_dimension_is_exact() {
                let (_guard, store) = $factory().await;
                let batch = (0..5)
                    .map(|i| article(&format!("doc-{}", i), padded(&[i as f32 + 1.0])))
                    .collect();
                store.batch_store(batch).await.expect("should store batch");

                let stats = store.stats().await.expect("should compute stats");
                assert_eq!(stats.average_dimension, 384.0);
                assert_eq!(stats.estimated_storage_bytes, 5 * 384 * 4);
                assert_eq!(stats.by_content_type.get("article"), Some(&5));
            }

            #[tokio::test]
            async fn partial_key_operations() {
                let (_guard, store) = $factory().await;
                let first = store
                    .store(NewEmbedding::new("doc", "article", "m1", vec![1.0]))
                    .await
                    .expect("should store");
                store
                    .store(NewEmbedding::new("doc", "summary", "m2", vec![1.0]))
                    .await
                    .expect("should store");
                store
                    .store(NewEmbedding::new("other", "article", "m1", vec![1.0]))
                    .await
                    .expect("should store");

                let found = store
                    .get("doc", None, None)
                    .await
                    .expect("should read")
                    .expect("record should exist");
                assert_eq!(found.id, first);

                assert_eq!(
                    store
                        .delete_by_content_id("doc")
                        .await
                        .expect("should delete"),
                    2
                );
                assert!(store.get("doc", None, None).await.expect("should read").is_none());
                assert!(store.get("other", None, None).await.expect("should read").is_some());
            }

            #[tokio::test]
            async fn batch_delete_counts_existing_ids() {
                let (_guard, store) = $factory().await;
                let ids = store
                    .batch_store(vec![
                        article("a", vec![1.0]),
                        article("b", vec![1.0]),
                    ])
                    .await
                    .expect("should store batch");

                let removed = store
                    .batch_delete(&[ids[0], ids[1], ids[1] + 1000])
                    .await
                    .expect("should delete");
                assert_eq!(removed, 2);
                assert!(store.get_by_id(ids[0]).await.expect("should read").is_none());
            }

            #[tokio::test]
            async fn metadata_record_is_replaced_and_removed() {
                let (_guard, store) = $factory().await;
                let metadata = metadata_from(&json!({
                    "title": "Ownership",
                    "summary": "x".repeat(600),
                    "source": "rust-book",
                    "chapter": 4
                }))
                .expect("object metadata");
                let id = store
                    .store(article("doc", vec![1.0]).with_metadata(metadata))
                    .await
                    .expect("should store");

                let record = store
                    .get_metadata(id)
                    .await
                    .expect("should read")
                    .expect("metadata should exist");
                assert_eq!(record.embedding_id, id);
                assert_eq!(record.title.as_deref(), Some("Ownership"));
                assert_eq!(record.source.as_deref(), Some("rust-book"));
                assert_eq!(record.content_snippet.map(|s| s.chars().count()), Some(500));
                assert_eq!(record.extra.get("chapter"), Some(&json!(4)));

                let key = EmbeddingKey::new("doc", "article", "m");
                let replacement = metadata_from(&json!({ "title": "Borrowing" }))
                    .expect("object metadata");
                store
                    .update_metadata(&key, replacement)
                    .await
                    .expect("should update");

                let updated = store
                    .get_metadata(id)
                    .await
                    .expect("should read")
                    .expect("metadata should exist");
                assert_eq!(updated.id, record.id);
                assert_eq!(updated.title.as_deref(), Some("Borrowing"));
                assert!(updated.content_snippet.is_none());

                let stored = store
                    .get_by_id(id)
                    .await
                    .expect("should read")
                    .expect("record should exist");
                assert_eq!(stored.metadata.get("title"), Some(&json!("Borrowing")));

                store.delete_by_content_id("doc").await.expect("should delete");
                assert!(store.get_metadata(id).await.expect("should read").is_none());
            }

            #[tokio::test]
            async fn update_metadata_of_missing_key_is_not_found() {
                let (_guard, store) = $factory().await;
                let error = store
                    .update_metadata(
                        &EmbeddingKey::new("missing", "article", "m"),
                        metadata_from(&json!({ "title": "x" })).expect("object metadata"),
                    )
                    .await
                    .expect_err("missing key should fail");
                assert!(error.is_not_found());
            }

            #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
            async fn concurrent_upserts_of_one_key() {
                let (_guard, store) = $factory().await;

                let mut handles = Vec::new();
                for i in 0..10 {
                    let store = Arc::clone(&store);
                    handles.push(tokio::spawn(async move {
                        store.store(article("shared", padded(&[i as f32 + 1.0]))).await
                    }));
                }

                let mut ids = Vec::new();
                for handle in handles {
                    ids.push(
                        handle
                            .await
                            .expect("task should join")
                            .expect("store should succeed"),
                    );
                }
                ids.dedup();

                assert_eq!(ids.len(), 1);
                let stats = store.stats().await.expect("should compute stats");
                assert_eq!(stats.total_embeddings, 1);
            }
        }
    };
}

store_contract!(memory, memory_store);
store_contract!(sqlite, sqlite_store);

#[test]
fn orthogonal_unit_vectors_have_zero_similarity() {
    for axis in 1..DIMENSION {
        let mut other = vec![0.0; DIMENSION];
        other[axis] = 1.0;
        let score = VectorEncoder::compute_similarity(&padded(&[1.0]), &other)
            .expect("same length");
        assert!(score.abs() < 1e-6);
    }
}

#[test]
fn unsupported_metric_is_a_validation_error() {
    let error = "manhattan"
        .parse::<SimilarityMetric>()
        .expect_err("unknown metric should fail");
    assert!(matches!(error, StoreError::Validation(_)));
}
