//! Retrieval over patient-history records, with grounded summaries.
//!
//! # Ranking
//!
//! 1. Embed the query. If that fails for any reason, rank by keyword
//!    overlap instead; this is a silent degrade, not an error.
//! 2. Semantic path: decode each record's stored embedding (records with
//!    none, or a corrupt one, are left out), score by cosine similarity,
//!    keep scores `>= min_similarity`.
//! 3. Keyword path: score = matched query terms / query terms, where a
//!    term matches if it is a substring of `"title content"` (lower-cased).
//!    Records with no matching term are left out; there is no threshold.
//! 4. Sort descending (stable, so ties keep input order) and truncate to `top_k`.
//!
//! Results never carry embeddings: they are built from [`RecordView`].
//! Stored embeddings are read, never written; [`RetrievalEngine::embed_records`]
//! hands fresh vectors back to the caller to persist.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::{GenerateRequest, GenerativeBackend};
use crate::embedding::{cosine_similarity, decode_embedding};
use crate::models::{
    AnswerResponse, Confidence, EmbeddedRecord, EmbeddingBackfill, MedicalRecord, RecordView,
    SearchResult, SummaryResponse,
};

const SUMMARY_SYSTEM_PROMPT: &str = "You are a medical records assistant. Summarize relevant medical history clearly and concisely.
Focus on clinically relevant information. Use professional medical language.";

const ANSWER_SYSTEM_PROMPT: &str = "You are a medical records assistant. Answer questions based only on the provided records.
If the information is not in the records, say so. Be precise and factual.";

/// How a search call ends up scoring records.
enum Ranking {
    Semantic(Vec<f32>),
    Keyword,
}

pub struct RetrievalEngine {
    backend: Arc<dyn GenerativeBackend>,
    top_k: usize,
    min_similarity: f64,
    supporting_records: usize,
}

impl RetrievalEngine {
    pub fn new(backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            backend,
            top_k: 5,
            min_similarity: 0.3,
            supporting_records: 3,
        }
    }

    /// Defaults used by [`search_and_summarize`](Self::search_and_summarize)
    /// and [`answer_question`](Self::answer_question).
    pub fn with_defaults(mut self, top_k: usize, min_similarity: f64, supporting: usize) -> Self {
        self.top_k = top_k;
        self.min_similarity = min_similarity;
        self.supporting_records = supporting;
        self
    }

    pub fn default_top_k(&self) -> usize {
        self.top_k
    }

    pub fn default_min_similarity(&self) -> f64 {
        self.min_similarity
    }

    /// Rank `records` against `query`; at most `top_k` results, best first.
    pub async fn search(
        &self,
        query: &str,
        records: &[MedicalRecord],
        top_k: usize,
        min_similarity: f64,
    ) -> Vec<SearchResult> {
        if query.trim().is_empty() || records.is_empty() || top_k == 0 {
            return Vec::new();
        }

        let ranking = match self.backend.embed(query).await {
            Ok(vec) => Ranking::Semantic(vec),
            Err(e) => {
                warn!(error = %e, "query embedding failed, falling back to keyword search");
                Ranking::Keyword
            }
        };

        let scored = match ranking {
            Ranking::Semantic(query_vec) => semantic_scores(&query_vec, records, min_similarity),
            Ranking::Keyword => keyword_scores(query, records),
        };

        rank(records, scored, top_k)
    }

    /// Retrieve, then ask the backend for a clinical summary of the hits.
    ///
    /// Zero hits returns a canned message without calling the backend. A
    /// failed summary call still returns the hits, with `ai_error` set.
    pub async fn search_and_summarize(
        &self,
        query: &str,
        records: &[MedicalRecord],
        subject_name: &str,
        top_k: usize,
    ) -> SummaryResponse {
        let hits = self.search(query, records, top_k, self.min_similarity).await;

        if hits.is_empty() {
            return SummaryResponse {
                success: true,
                query: query.to_string(),
                records_found: 0,
                records: Vec::new(),
                summary: format!(
                    "No records found related to '{}' in {}'s medical history.",
                    query, subject_name
                ),
                ai_error: None,
            };
        }

        let context = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                format!(
                    "{}. [{}] {} ({}): {}",
                    i + 1,
                    hit.record.record_type,
                    title_or_untitled(&hit.record),
                    date_or(&hit.record, "Unknown date"),
                    hit.record.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Based on the search query \"{query}\", summarize the relevant medical history for {subject_name}.

Relevant records:
{context}

Provide a concise summary highlighting:
1. Key findings related to the query
2. Timeline of relevant events
3. Any ongoing concerns or follow-up needs"
        );

        let request = GenerateRequest::new(prompt)
            .system(SUMMARY_SYSTEM_PROMPT)
            .temperature(0.5);

        let records_found = hits.len();
        match self.backend.generate_text(&request).await {
            Ok(summary) => SummaryResponse {
                success: true,
                query: query.to_string(),
                records_found,
                records: hits,
                summary,
                ai_error: None,
            },
            Err(e) => {
                warn!(error = %e, "history summary generation failed");
                SummaryResponse {
                    success: true,
                    query: query.to_string(),
                    records_found,
                    records: hits,
                    summary: format!(
                        "Found {} relevant records. AI summary unavailable.",
                        records_found
                    ),
                    ai_error: Some(e.to_string()),
                }
            }
        }
    }

    /// Answer a question from the records.
    ///
    /// Confidence is `high` with two or more supporting records, `medium`
    /// with one, and `low` only when nothing was found (no backend call).
    pub async fn answer_question(
        &self,
        question: &str,
        records: &[MedicalRecord],
        subject_name: &str,
    ) -> AnswerResponse {
        let mut hits = self
            .search(question, records, self.top_k, self.min_similarity)
            .await;

        if hits.is_empty() {
            return AnswerResponse {
                success: true,
                question: question.to_string(),
                answer: format!(
                    "I couldn't find relevant information to answer this question in {}'s records.",
                    subject_name
                ),
                confidence: Some(Confidence::Low),
                supporting_records: Vec::new(),
                error: None,
            };
        }

        let context = hits
            .iter()
            .map(|hit| {
                format!(
                    "[{}] {}: {}",
                    date_or(&hit.record, "Unknown"),
                    hit.record.title,
                    hit.record.content
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Question about {subject_name}: {question}

Available records:
{context}

Answer the question based on these records. If you cannot find the answer, say so clearly."
        );

        let request = GenerateRequest::new(prompt)
            .system(ANSWER_SYSTEM_PROMPT)
            .temperature(0.3);

        let confidence = if hits.len() >= 2 {
            Confidence::High
        } else {
            Confidence::Medium
        };
        let result = self.backend.generate_text(&request).await;
        hits.truncate(self.supporting_records);

        match result {
            Ok(answer) => AnswerResponse {
                success: true,
                question: question.to_string(),
                answer,
                confidence: Some(confidence),
                supporting_records: hits,
                error: None,
            },
            Err(e) => {
                warn!(error = %e, "question answering generation failed");
                AnswerResponse {
                    success: false,
                    question: question.to_string(),
                    answer: "Unable to process question at this time.".to_string(),
                    confidence: None,
                    supporting_records: hits,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Compute embeddings for records that lack a usable one.
    ///
    /// Nothing is stored here; the caller persists `embedded`.
    pub async fn embed_records(&self, records: &[MedicalRecord]) -> EmbeddingBackfill {
        let mut backfill = EmbeddingBackfill::default();

        for record in records {
            let usable = record
                .embedding
                .as_ref()
                .is_some_and(|stored| decode_embedding(stored).is_ok());
            if usable {
                backfill.skipped += 1;
                continue;
            }

            match self.backend.embed(&searchable_text(record)).await {
                Ok(embedding) => backfill.embedded.push(EmbeddedRecord {
                    id: record.id,
                    embedding,
                }),
                Err(e) => {
                    warn!(record_id = record.id, error = %e, "record embedding failed");
                    backfill.failed.push(record.id);
                }
            }
        }

        debug!(
            embedded = backfill.embedded.len(),
            failed = backfill.failed.len(),
            skipped = backfill.skipped,
            "embedding backfill finished"
        );
        backfill
    }
}

/// Text embedded for a record: title, content, and type.
pub fn searchable_text(record: &MedicalRecord) -> String {
    format!("{} {} {}", record.title, record.content, record.record_type)
}

/// `(record index, cosine similarity)` for records with a usable embedding.
/// Scores of zero or below never match, whatever the threshold.
pub fn semantic_scores(
    query_vec: &[f32],
    records: &[MedicalRecord],
    min_similarity: f64,
) -> Vec<(usize, f64)> {
    let mut scored = Vec::new();

    for (i, record) in records.iter().enumerate() {
        let Some(stored) = &record.embedding else {
            continue;
        };
        let vec = match decode_embedding(stored) {
            Ok(v) => v,
            Err(e) => {
                warn!(record_id = record.id, error = %e, "skipping record with corrupt embedding");
                continue;
            }
        };

        let similarity = cosine_similarity(query_vec, &vec);
        if similarity > 0.0 && similarity >= min_similarity {
            scored.push((i, similarity));
        }
    }

    scored
}

/// `(record index, overlap ratio)` for records matching at least one term.
pub fn keyword_scores(query: &str, records: &[MedicalRecord]) -> Vec<(usize, f64)> {
    let query = query.to_lowercase();
    let terms: Vec<&str> = query.split_whitespace().collect();
    if terms.is_empty() {
        return Vec::new();
    }

    records
        .iter()
        .enumerate()
        .filter_map(|(i, record)| {
            let haystack = format!("{} {}", record.title, record.content).to_lowercase();
            let matches = terms.iter().filter(|t| haystack.contains(*t)).count();
            (matches > 0).then(|| (i, matches as f64 / terms.len() as f64))
        })
        .collect()
}

fn rank(records: &[MedicalRecord], mut scored: Vec<(usize, f64)>, top_k: usize) -> Vec<SearchResult> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(top_k);
    scored
        .into_iter()
        .map(|(i, similarity)| SearchResult {
            record: RecordView::from(&records[i]),
            similarity,
        })
        .collect()
}

fn title_or_untitled(record: &RecordView) -> &str {
    if record.title.is_empty() {
        "Untitled"
    } else {
        &record.title
    }
}

fn date_or(record: &RecordView, fallback: &str) -> String {
    record
        .record_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DisabledBackend;
    use crate::models::StoredEmbedding;

    fn record(id: i64, title: &str, content: &str, embedding: Option<StoredEmbedding>) -> MedicalRecord {
        MedicalRecord {
            id,
            record_type: "note".to_string(),
            title: title.to_string(),
            content: content.to_string(),
            record_date: None,
            embedding,
        }
    }

    #[test]
    fn keyword_ratio_counts_matching_terms() {
        let records = vec![
            record(1, "Cardiac exam", "Murmur noted, echo ordered", None),
            record(2, "Dermatology", "Eczema flare", None),
            record(3, "Follow-up", "cardiac echo normal", None),
        ];
        let scores = keyword_scores("Cardiac ECHO murmur", &records);
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0], (0, 1.0));
        assert_eq!(scores[1].0, 2);
        assert!((scores[1].1 - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn keyword_empty_query_matches_nothing() {
        let records = vec![record(1, "Anything", "at all", None)];
        assert!(keyword_scores("", &records).is_empty());
        assert!(keyword_scores("   ", &records).is_empty());
    }

    #[test]
    fn semantic_skips_missing_and_corrupt_embeddings() {
        let records = vec![
            record(1, "a", "", Some(StoredEmbedding::Vector(vec![1.0, 0.0]))),
            record(2, "b", "", None),
            record(3, "c", "", Some(StoredEmbedding::Serialized("{broken".into()))),
            record(4, "d", "", Some(StoredEmbedding::Serialized("[0.0, 1.0]".into()))),
            record(5, "e", "", Some(StoredEmbedding::Serialized("[0.8, 0.6]".into()))),
        ];
        let scores = semantic_scores(&[1.0, 0.0], &records, 0.3);
        let ids: Vec<usize> = scores.iter().map(|(i, _)| *i).collect();
        assert_eq!(ids, vec![0, 4]);
    }

    #[test]
    fn semantic_never_returns_non_positive_scores() {
        let records = vec![
            record(1, "a", "", Some(StoredEmbedding::Vector(vec![0.6, 0.8]))),
            record(2, "b", "", Some(StoredEmbedding::Vector(vec![-1.0, 0.0]))),
            record(3, "c", "", Some(StoredEmbedding::Vector(vec![0.0, 1.0]))),
            record(4, "d", "", Some(StoredEmbedding::Vector(vec![1.0, 0.0, 0.0]))),
        ];
        let scores = semantic_scores(&[1.0, 0.0], &records, 0.0);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].0, 0);
        assert!((scores[0].1 - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn keyword_path_ignores_similarity_threshold() {
        let engine = RetrievalEngine::new(Arc::new(DisabledBackend));
        let records = vec![record(1, "Asthma review", "inhaler technique", None)];
        let results = engine
            .search("asthma a1 a2 a3 a4 a5", &records, 5, 0.3)
            .await;
        assert_eq!(results.len(), 1);
        assert!((results[0].similarity - 1.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn rank_sorts_descending_and_truncates() {
        let records: Vec<MedicalRecord> =
            (0..4).map(|i| record(i, "t", "c", None)).collect();
        let ranked = rank(&records, vec![(0, 0.2), (1, 0.9), (2, 0.5), (3, 0.9)], 3);
        let ids: Vec<i64> = ranked.iter().map(|r| r.record.id).collect();
        assert_eq!(ids, vec![1, 3, 2]);
        for pair in ranked.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[tokio::test]
    async fn disabled_backend_uses_keyword_search() {
        let engine = RetrievalEngine::new(Arc::new(DisabledBackend));
        let records = vec![
            record(1, "Asthma review", "inhaler technique", Some(StoredEmbedding::Vector(vec![1.0]))),
            record(2, "Knee pain", "physio", None),
        ];
        let results = engine.search("asthma inhaler", &records, 5, 0.3).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id, 1);
        assert_eq!(results[0].similarity, 1.0);
    }

    #[tokio::test]
    async fn empty_query_returns_nothing() {
        let engine = RetrievalEngine::new(Arc::new(DisabledBackend));
        let records = vec![record(1, "Asthma", "inhaler", None)];
        assert!(engine.search("", &records, 5, 0.3).await.is_empty());
    }

    #[tokio::test]
    async fn summary_with_no_hits_is_canned() {
        let engine = RetrievalEngine::new(Arc::new(DisabledBackend));
        let response = engine
            .search_and_summarize("oncology", &[], "Jane Doe", 5)
            .await;
        assert!(response.success);
        assert_eq!(response.records_found, 0);
        assert_eq!(
            response.summary,
            "No records found related to 'oncology' in Jane Doe's medical history."
        );
        assert!(response.ai_error.is_none());
    }

    #[tokio::test]
    async fn summary_degrades_when_generation_fails() {
        let engine = RetrievalEngine::new(Arc::new(DisabledBackend));
        let records = vec![record(1, "Asthma review", "inhaler technique", None)];
        let response = engine
            .search_and_summarize("asthma", &records, "the patient", 5)
            .await;
        assert!(response.success);
        assert_eq!(response.records_found, 1);
        assert_eq!(response.summary, "Found 1 relevant records. AI summary unavailable.");
        assert!(response.ai_error.is_some());
    }

    #[tokio::test]
    async fn answer_with_no_hits_is_low_confidence() {
        let engine = RetrievalEngine::new(Arc::new(DisabledBackend));
        let response = engine.answer_question("Any fractures?", &[], "the patient").await;
        assert!(response.success);
        assert_eq!(response.confidence, Some(Confidence::Low));
        assert!(response.supporting_records.is_empty());
    }

    #[tokio::test]
    async fn backfill_reports_failures() {
        let engine = RetrievalEngine::new(Arc::new(DisabledBackend));
        let records = vec![
            record(1, "a", "", Some(StoredEmbedding::Vector(vec![0.1, 0.2]))),
            record(2, "b", "", None),
            record(3, "c", "", Some(StoredEmbedding::Serialized("garbage".into()))),
        ];
        let backfill = engine.embed_records(&records).await;
        assert_eq!(backfill.skipped, 1);
        assert!(backfill.embedded.is_empty());
        assert_eq!(backfill.failed, vec![2, 3]);
    }
}
