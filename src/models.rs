//! Core data models used throughout the decision-support layer.
//!
//! Inputs (`MedicalRecord`, `PrescriptionRequest`) arrive from the caller
//! as plain structured values; outputs are JSON-serializable envelopes
//! whose flags (`success`, `ai_available`, `parse_error`) carry every
//! degraded state, so nothing here is ever returned as an `Err`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============ Records ============

/// A persisted patient-history snippet, as handed over by the caller.
///
/// `embedding` is whatever the caller stored last time: a vector, a
/// serialized vector, or nothing. The retrieval engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicalRecord {
    pub id: i64,
    #[serde(default = "default_record_type")]
    pub record_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub record_date: Option<NaiveDate>,
    #[serde(default)]
    pub embedding: Option<StoredEmbedding>,
}

fn default_record_type() -> String {
    "record".to_string()
}

/// An embedding as stored by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StoredEmbedding {
    Vector(Vec<f32>),
    /// JSON array text or a `b64:` little-endian f32 blob.
    Serialized(String),
    /// Any other JSON value. Kept so one bad record does not reject the
    /// whole batch; it never decodes.
    Corrupt(serde_json::Value),
}

/// A record as returned to callers. Has no embedding field at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordView {
    pub id: i64,
    pub record_type: String,
    pub title: String,
    pub content: String,
    pub record_date: Option<NaiveDate>,
}

impl From<&MedicalRecord> for RecordView {
    fn from(record: &MedicalRecord) -> Self {
        Self {
            id: record.id,
            record_type: record.record_type.clone(),
            title: record.title.clone(),
            content: record.content.clone(),
            record_date: record.record_date,
        }
    }
}

/// One ranked hit. `similarity` is cosine or keyword-overlap, both in `[0, 1]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub record: RecordView,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub success: bool,
    pub query: String,
    pub records_found: usize,
    pub records: Vec<SearchResult>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub success: bool,
    pub question: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
    pub supporting_records: Vec<SearchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A freshly computed embedding the caller should persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedRecord {
    pub id: i64,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbeddingBackfill {
    pub embedded: Vec<EmbeddedRecord>,
    /// Records whose embedding call failed.
    pub failed: Vec<i64>,
    /// Records that already carried a usable embedding.
    pub skipped: usize,
}

// ============ Interactions ============

/// Total, fixed ordering: `none < low < moderate < high < critical`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Low,
    Moderate,
    High,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Some(Severity::None),
            "low" | "minor" => Some(Severity::Low),
            "moderate" | "medium" => Some(Severity::Moderate),
            "high" | "major" | "severe" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    /// `none` and `low` are considered safe to co-prescribe.
    pub fn is_safe(self) -> bool {
        self <= Severity::Low
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSource {
    Database,
    AllergyCheck,
    AiAnalysis,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InteractionFinding {
    /// Zero, one, or two drug names.
    pub drugs: Vec<String>,
    pub severity: Severity,
    pub warning: String,
    pub source: FindingSource,
}

impl InteractionFinding {
    /// Sorted drug pair, when the finding names exactly two drugs.
    pub fn pair_key(&self) -> Option<(String, String)> {
        match self.drugs.as_slice() {
            [a, b] => Some(sorted_pair(a, b)),
            _ => None,
        }
    }
}

/// Order-independent key for a drug pair.
pub fn sorted_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Result of one interaction check. Recomputed on every call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractionVerdict {
    pub medications_checked: Vec<String>,
    pub allergies_considered: Vec<String>,
    pub findings: Vec<InteractionFinding>,
    pub severity: Severity,
    pub safe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub general_advice: Option<String>,
}

impl InteractionVerdict {
    /// The neutral verdict: nothing checked, nothing found.
    pub fn empty(allergies: &[String]) -> Self {
        Self {
            allergies_considered: allergies.to_vec(),
            safe: true,
            ..Default::default()
        }
    }

    /// Append a finding and escalate severity; never lowers it.
    pub fn push(&mut self, finding: InteractionFinding) {
        self.severity = self.severity.max(finding.severity);
        self.safe = self.severity.is_safe();
        self.findings.push(finding);
    }

    pub fn extend(&mut self, findings: impl IntoIterator<Item = InteractionFinding>) {
        for finding in findings {
            self.push(finding);
        }
    }
}

/// Maximum severity across findings; `none` when there are none.
pub fn resolve_severity(findings: &[InteractionFinding]) -> Severity {
    findings
        .iter()
        .map(|f| f.severity)
        .max()
        .unwrap_or_default()
}

// ============ Prescriptions ============

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrescriptionRequest {
    pub diagnosis: String,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub current_medications: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionSource {
    Guidelines,
    Ai,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrescriptionSuggestion {
    pub medication: String,
    pub dosage: String,
    pub frequency: String,
    pub duration: String,
    pub instructions: String,
    pub warnings: Vec<String>,
    pub alternatives: Vec<String>,
    pub reasoning: String,
    pub source: SuggestionSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionResponse {
    pub success: bool,
    pub suggestion: Option<PrescriptionSuggestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SuggestionSource>,
    pub ai_available: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parse_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guideline_match: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction_check: Option<InteractionVerdict>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionsResponse {
    pub success: bool,
    pub instructions: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
