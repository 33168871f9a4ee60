//! Retrieval, summaries, and Q&A against an in-process backend.

mod common;

use clinical_assist::embedding::{encode_embedding, EmbeddingFormat};
use clinical_assist::models::{Confidence, MedicalRecord};
use clinical_assist::retrieval::RetrievalEngine;
use common::FakeBackend;
use serde_json::json;
use std::sync::Arc;

fn records() -> Vec<MedicalRecord> {
    let blob = encode_embedding(&[1.0, 0.0, 0.0], EmbeddingFormat::Blob);
    serde_json::from_value(json!([
        {"id": 1, "record_type": "visit", "title": "Cardiology consult",
         "content": "Heart murmur, echo ordered", "record_date": "2024-01-10",
         "embedding": [0.9, 0.1, 0.0]},
        {"id": 2, "record_type": "visit", "title": "Dermatology",
         "content": "Eczema flare", "embedding": [0.0, 1.0, 0.0]},
        {"id": 3, "record_type": "imaging", "title": "Echocardiogram",
         "content": "Mild mitral regurgitation", "embedding": "[0.6, 0.0, 0.8]"},
        {"id": 4, "record_type": "imaging", "title": "Knee X-ray", "content": "No fracture"},
        {"id": 5, "record_type": "lab", "title": "ECG", "content": "Sinus rhythm",
         "record_date": "2024-02-01", "embedding": blob},
        {"id": 6, "title": "Old note", "content": "Corrupt", "embedding": "[1.0, \"x\""}
    ]))
    .unwrap()
}

fn ids(hits: &[clinical_assist::models::SearchResult]) -> Vec<i64> {
    hits.iter().map(|h| h.record.id).collect()
}

#[tokio::test]
async fn semantic_search_ranks_by_cosine() {
    let backend = FakeBackend::new().vector("heart", vec![1.0, 0.0, 0.0]);
    let engine = RetrievalEngine::new(Arc::new(backend));

    let hits = engine.search("heart", &records(), 5, 0.3).await;
    assert_eq!(ids(&hits), vec![5, 1, 3]);
    assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));

    let top2 = engine.search("heart", &records(), 2, 0.3).await;
    assert_eq!(ids(&top2), vec![5, 1]);
}

#[tokio::test]
async fn higher_threshold_drops_weak_matches() {
    let backend = FakeBackend::new().vector("heart", vec![1.0, 0.0, 0.0]);
    let engine = RetrievalEngine::new(Arc::new(backend));
    let hits = engine.search("heart", &records(), 5, 0.7).await;
    assert_eq!(ids(&hits), vec![5, 1]);
}

#[tokio::test]
async fn embedding_failure_falls_back_to_keywords() {
    let engine = RetrievalEngine::new(Arc::new(FakeBackend::new()));
    let hits = engine.search("Echo murmur", &records(), 5, 0.3).await;
    assert_eq!(ids(&hits), vec![1, 3]);
    assert_eq!(hits[0].similarity, 1.0);
    assert_eq!(hits[1].similarity, 0.5);
}

#[tokio::test]
async fn results_never_carry_embeddings() {
    let backend = FakeBackend::new().vector("heart", vec![1.0, 0.0, 0.0]);
    let engine = RetrievalEngine::new(Arc::new(backend));
    let hits = engine.search("heart", &records(), 5, 0.0).await;
    let json = serde_json::to_value(&hits).unwrap();
    for hit in json.as_array().unwrap() {
        assert!(hit.get("embedding").is_none());
        assert!(hit.get("similarity").is_some());
    }
}

#[tokio::test]
async fn summary_uses_ranked_context() {
    let backend = Arc::new(
        FakeBackend::new()
            .vector("heart", vec![1.0, 0.0, 0.0])
            .replying("Murmur under follow-up."),
    );
    let engine = RetrievalEngine::new(backend.clone());

    let res = engine
        .search_and_summarize("heart", &records(), "Jane Doe", 5)
        .await;
    assert!(res.success);
    assert_eq!(res.records_found, 3);
    assert_eq!(res.summary, "Murmur under follow-up.");
    assert!(res.ai_error.is_none());

    let prompt = backend.last_prompt();
    assert!(prompt.contains("summarize the relevant medical history for Jane Doe"));
    assert!(prompt.contains("1. [lab] ECG (2024-02-01): Sinus rhythm"));
    assert!(prompt.contains("3. [imaging] Echocardiogram (Unknown date): Mild mitral regurgitation"));
}

#[tokio::test]
async fn summary_failure_keeps_records() {
    let backend = FakeBackend::new().vector("heart", vec![1.0, 0.0, 0.0]);
    let engine = RetrievalEngine::new(Arc::new(backend));
    let res = engine
        .search_and_summarize("heart", &records(), "Jane Doe", 5)
        .await;
    assert!(res.success);
    assert_eq!(res.records.len(), 3);
    assert_eq!(res.summary, "Found 3 relevant records. AI summary unavailable.");
    assert!(res.ai_error.is_some());
}

#[tokio::test]
async fn summary_without_hits_skips_backend() {
    let backend = Arc::new(FakeBackend::new().replying("unused"));
    let engine = RetrievalEngine::new(backend.clone());
    let res = engine
        .search_and_summarize("oncology", &records(), "Jane Doe", 5)
        .await;
    assert_eq!(res.records_found, 0);
    assert_eq!(
        res.summary,
        "No records found related to 'oncology' in Jane Doe's medical history."
    );
    assert_eq!(backend.prompt_count(), 0);
}

#[tokio::test]
async fn answer_confidence_follows_support() {
    let backend = FakeBackend::new()
        .vector("heart", vec![1.0, 0.0, 0.0])
        .vector("skin", vec![0.0, 1.0, 0.0])
        .replying("Yes, a murmur was noted.");
    let engine = RetrievalEngine::new(Arc::new(backend));

    let res = engine
        .answer_question("any heart problems?", &records(), "Jane Doe")
        .await;
    assert!(res.success);
    assert_eq!(res.confidence, Some(Confidence::High));
    assert_eq!(res.answer, "Yes, a murmur was noted.");
    assert_eq!(res.supporting_records.len(), 3);

    let res = engine
        .answer_question("any skin problems?", &records(), "Jane Doe")
        .await;
    assert_eq!(res.confidence, Some(Confidence::Medium));
    assert_eq!(ids(&res.supporting_records), vec![2]);
}

#[tokio::test]
async fn answer_failure_shape() {
    let backend = FakeBackend::new().vector("heart", vec![1.0, 0.0, 0.0]);
    let engine = RetrievalEngine::new(Arc::new(backend));
    let res = engine
        .answer_question("heart history?", &records(), "Jane Doe")
        .await;
    assert!(!res.success);
    assert_eq!(res.answer, "Unable to process question at this time.");
    assert!(res.error.is_some());
    assert!(!res.supporting_records.is_empty());
}

#[tokio::test]
async fn backfill_embeds_only_missing_or_corrupt() {
    let backend = FakeBackend::new().vector("Knee", vec![0.0, 0.0, 1.0]);
    let engine = RetrievalEngine::new(Arc::new(backend));

    let backfill = engine.embed_records(&records()).await;
    assert_eq!(backfill.skipped, 4);
    assert_eq!(backfill.embedded.len(), 1);
    assert_eq!(backfill.embedded[0].id, 4);
    assert_eq!(backfill.embedded[0].embedding, vec![0.0, 0.0, 1.0]);
    assert_eq!(backfill.failed, vec![6]);
}

#[tokio::test]
async fn mistyped_embeddings_exclude_only_their_record() {
    let records: Vec<MedicalRecord> = serde_json::from_str(
        r#"[
  {"id": 1, "title": "Cardiology consult", "content": "Heart murmur", "embedding": [1.0, 0.0]},
  {"id": 2, "title": "Cardiac echo", "content": "Normal", "embedding": [0.1, "NaN"]},
  {"id": 3, "title": "Heart monitor", "content": "Holter", "embedding": {}},
  {"id": 4, "title": "ECG", "content": "Sinus rhythm", "embedding": 42}
]"#,
    )
    .unwrap();
    assert_eq!(records.len(), 4);

    let backend = FakeBackend::new()
        .vector("heart", vec![1.0, 0.0])
        .vector("Cardiac", vec![0.9, 0.1])
        .vector("Holter", vec![0.0, 1.0]);
    let engine = RetrievalEngine::new(Arc::new(backend));

    let hits = engine.search("heart", &records, 5, 0.3).await;
    assert_eq!(ids(&hits), vec![1]);

    let backfill = engine.embed_records(&records).await;
    assert_eq!(backfill.skipped, 1);
    let embedded: Vec<i64> = backfill.embedded.iter().map(|r| r.id).collect();
    assert_eq!(embedded, vec![2, 3]);
    assert_eq!(backfill.failed, vec![4]);
}
