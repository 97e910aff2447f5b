use super::*;
use crate::embeddings::similarity::SimilarityMetric;

struct Stored {
    id: i64,
    content_id: &'static str,
    content_type: &'static str,
    model_name: &'static str,
    vector: Vec<f32>,
}

fn stored(id: i64, content_id: &'static str, vector: Vec<f32>) -> Stored {
    Stored {
        id,
        content_id,
        content_type: "article",
        model_name: "m",
        vector,
    }
}

fn run(query: &SearchQuery, records: &[Stored]) -> Vec<SearchHit> {
    let empty = Metadata::new();
    let mut ranker = Ranker::new(query);
    for record in records {
        ranker.offer(Candidate {
            id: record.id,
            content_id: record.content_id,
            content_type: record.content_type,
            model_name: record.model_name,
            vector: &record.vector,
            title: None,
            content_snippet: None,
            metadata: &empty,
        });
    }
    ranker.finish()
}

fn ids(hits: &[SearchHit]) -> Vec<&str> {
    hits.iter().map(|h| h.content_id.as_str()).collect()
}

#[test]
fn equal_scores_are_ordered_by_content_id() {
    let records = vec![
        stored(1, "charlie", vec![1.0, 0.0]),
        stored(2, "alpha", vec![2.0, 0.0]),
        stored(3, "bravo", vec![0.5, 0.0]),
    ];
    let hits = run(&SearchQuery::new(vec![1.0, 0.0]), &records);
    assert_eq!(ids(&hits), vec!["alpha", "bravo", "charlie"]);
}

#[test]
fn threshold_and_top_k_are_applied() {
    let records = vec![
        stored(1, "a", vec![1.0, 0.0]),
        stored(2, "b", vec![0.0, 1.0]),
        stored(3, "c", vec![0.9, 0.1]),
        stored(4, "d", vec![0.7, 0.7]),
    ];

    let query = SearchQuery::new(vec![1.0, 0.0])
        .top_k(2)
        .min_similarity(0.5);
    let hits = run(&query, &records);

    assert_eq!(ids(&hits), vec!["a", "c"]);
    assert!(hits.iter().all(|h| h.score >= 0.5));

    let query = SearchQuery::new(vec![1.0, 0.0]).min_similarity(0.5);
    let hits = run(&query, &records);
    assert_eq!(ids(&hits), vec!["a", "c", "d"]);
}

#[test]
fn filters_restrict_candidates() {
    let mut summary = stored(2, "s", vec![1.0, 0.0]);
    summary.content_type = "summary";
    let mut other_model = stored(3, "o", vec![1.0, 0.0]);
    other_model.model_name = "other";
    let records = vec![stored(1, "a", vec![1.0, 0.0]), summary, other_model];

    let hits = run(
        &SearchQuery::new(vec![1.0, 0.0])
            .model_name("m")
            .content_type("article"),
        &records,
    );
    assert_eq!(ids(&hits), vec!["a"]);

    let hits = run(&SearchQuery::new(vec![1.0, 0.0]).model_name("m"), &records);
    assert_eq!(ids(&hits), vec!["a", "s"]);

    let hits = run(&SearchQuery::new(vec![1.0, 0.0]), &records);
    assert_eq!(hits.len(), 3);
}

#[test]
fn mismatched_dimensions_are_skipped() {
    let records = vec![
        stored(1, "a", vec![1.0, 0.0]),
        stored(2, "b", vec![1.0, 0.0, 0.0]),
    ];
    let query = SearchQuery::new(vec![1.0, 0.0]);
    let mut ranker = Ranker::new(&query);
    let empty = Metadata::new();
    for record in &records {
        ranker.offer(Candidate {
            id: record.id,
            content_id: record.content_id,
            content_type: record.content_type,
            model_name: record.model_name,
            vector: &record.vector,
            title: None,
            content_snippet: None,
            metadata: &empty,
        });
    }
    assert_eq!(ranker.scanned(), 1);
    assert_eq!(ids(&ranker.finish()), vec!["a"]);
}

#[test]
fn euclidean_scores_are_higher_for_closer_vectors() {
    let records = vec![
        stored(1, "far", vec![10.0, 10.0]),
        stored(2, "near", vec![1.0, 1.0]),
        stored(3, "exact", vec![0.0, 0.0]),
    ];
    let query = SearchQuery::new(vec![0.0, 0.0]).metric(SimilarityMetric::Euclidean);
    let hits = run(&query, &records);

    assert_eq!(ids(&hits), vec!["exact", "near", "far"]);
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[test]
fn rank_is_deterministic_across_input_orders() {
    let forward = vec![
        stored(1, "b", vec![1.0, 0.0]),
        stored(2, "a", vec![1.0, 0.0]),
        stored(3, "c", vec![0.0, 1.0]),
    ];
    let backward = vec![
        stored(3, "c", vec![0.0, 1.0]),
        stored(2, "a", vec![1.0, 0.0]),
        stored(1, "b", vec![1.0, 0.0]),
    ];
    let query = SearchQuery::new(vec![1.0, 0.0]);
    assert_eq!(run(&query, &forward), run(&query, &backward));
}
