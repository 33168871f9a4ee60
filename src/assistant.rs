//! The single entry point the CLI, the tool registry, and embedders use.
//!
//! [`ClinicalAssistant`] owns one backend handle and the read-only
//! reference tables, and wires them into the three reasoning components.
//! It holds no mutable state, so one instance behind an `Arc` serves any
//! number of concurrent calls.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::backend::{create_backend, GenerativeBackend};
use crate::config::Config;
use crate::guidelines::GuidelineStore;
use crate::interactions::InteractionChecker;
use crate::models::{
    AnswerResponse, EmbeddingBackfill, InstructionsResponse, InteractionVerdict, MedicalRecord,
    PrescriptionRequest, SearchResult, SuggestionResponse, SummaryResponse,
};
use crate::retrieval::RetrievalEngine;
use crate::rules::InteractionRuleStore;
use crate::suggestion::{PrescriptionAdvisor, CONSULT_PHYSICIAN};

/// Used in prompts and canned replies when the caller names no patient.
pub const DEFAULT_SUBJECT: &str = "the patient";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendStatus {
    pub available: bool,
    pub provider: String,
    pub chat_model: String,
    pub embedding_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    pub features: FeatureFlags,
}

/// What works right now. Only semantic search depends on the backend;
/// everything else degrades to rules, guidelines, or keyword scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub drug_interaction_check: bool,
    pub prescription_suggestions: bool,
    pub history_search: bool,
    pub semantic_search: bool,
}

pub struct ClinicalAssistant {
    backend: Arc<dyn GenerativeBackend>,
    interactions: InteractionChecker,
    advisor: PrescriptionAdvisor,
    retrieval: RetrievalEngine,
}

impl ClinicalAssistant {
    /// Build the backend from `[backend]` and load the reference tables.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = create_backend(&config.backend)?;
        Self::with_backend(config, backend)
    }

    /// Like [`from_config`](Self::from_config) with a caller-supplied backend.
    pub fn with_backend(config: &Config, backend: Arc<dyn GenerativeBackend>) -> Result<Self> {
        let rules = match &config.reference.interactions_path {
            Some(path) => InteractionRuleStore::load(path)?,
            None => InteractionRuleStore::builtin()?,
        };
        let guidelines = match &config.reference.guidelines_path {
            Some(path) => GuidelineStore::load(path)?,
            None => GuidelineStore::builtin()?,
        };
        debug!(
            backend = backend.name(),
            rules = rules.len(),
            guidelines = guidelines.len(),
            "clinical assistant ready"
        );

        let retrieval = RetrievalEngine::new(backend.clone()).with_defaults(
            config.retrieval.top_k,
            config.retrieval.min_similarity,
            config.retrieval.supporting_records,
        );

        Ok(Self {
            interactions: InteractionChecker::new(Arc::new(rules), backend.clone()),
            advisor: PrescriptionAdvisor::new(Arc::new(guidelines), backend.clone()),
            retrieval,
            backend,
        })
    }

    pub fn backend(&self) -> &Arc<dyn GenerativeBackend> {
        &self.backend
    }

    pub fn retrieval(&self) -> &RetrievalEngine {
        &self.retrieval
    }

    pub async fn status(&self) -> BackendStatus {
        let available = self.backend.is_available().await;
        let models = if available {
            self.backend.list_models().await.ok()
        } else {
            None
        };

        BackendStatus {
            available,
            provider: self.backend.name().to_string(),
            chat_model: self.backend.chat_model().to_string(),
            embedding_model: self.backend.embedding_model().to_string(),
            models,
            features: FeatureFlags {
                drug_interaction_check: true,
                prescription_suggestions: true,
                history_search: true,
                semantic_search: available,
            },
        }
    }

    pub async fn check_interactions(
        &self,
        medications: &[String],
        allergies: &[String],
        use_llm: bool,
    ) -> InteractionVerdict {
        self.interactions
            .check_interactions(medications, allergies, use_llm)
            .await
    }

    /// Suggest a prescription. When the patient already takes something,
    /// the suggested drug is run through a rules-only interaction check
    /// against it and the verdict attached as `interaction_check`. A
    /// suggestion that names no drug is not checked.
    pub async fn suggest_prescription(&self, request: &PrescriptionRequest) -> SuggestionResponse {
        let mut response = self.advisor.suggest_prescription(request).await;

        let suggested = response
            .suggestion
            .as_ref()
            .map(|s| s.medication.trim())
            .filter(|m| !m.is_empty() && *m != CONSULT_PHYSICIAN)
            .map(str::to_string);

        if let Some(medication) = suggested {
            if response.success && !request.current_medications.is_empty() {
                let mut meds = request.current_medications.clone();
                meds.push(medication);
                let verdict = self
                    .interactions
                    .check_interactions(&meds, &request.allergies, false)
                    .await;
                response.interaction_check = Some(verdict);
            }
        }
        response
    }

    pub async fn generate_instructions(
        &self,
        medication: &str,
        dosage: &str,
        diagnosis: &str,
        age: Option<u32>,
    ) -> InstructionsResponse {
        self.advisor
            .generate_instructions(medication, dosage, diagnosis, age)
            .await
    }

    pub async fn search(
        &self,
        query: &str,
        records: &[MedicalRecord],
        top_k: Option<usize>,
        min_similarity: Option<f64>,
    ) -> Vec<SearchResult> {
        self.retrieval
            .search(
                query,
                records,
                top_k.unwrap_or_else(|| self.retrieval.default_top_k()),
                min_similarity.unwrap_or_else(|| self.retrieval.default_min_similarity()),
            )
            .await
    }

    pub async fn search_history(
        &self,
        query: &str,
        records: &[MedicalRecord],
        subject: Option<&str>,
        top_k: Option<usize>,
    ) -> SummaryResponse {
        self.retrieval
            .search_and_summarize(
                query,
                records,
                subject.unwrap_or(DEFAULT_SUBJECT),
                top_k.unwrap_or_else(|| self.retrieval.default_top_k()),
            )
            .await
    }

    pub async fn ask_about_patient(
        &self,
        question: &str,
        records: &[MedicalRecord],
        subject: Option<&str>,
    ) -> AnswerResponse {
        self.retrieval
            .answer_question(question, records, subject.unwrap_or(DEFAULT_SUBJECT))
            .await
    }

    pub async fn embed_records(&self, records: &[MedicalRecord]) -> EmbeddingBackfill {
        self.retrieval.embed_records(records).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::ScriptedBackend;
    use crate::models::Severity;

    fn offline() -> ClinicalAssistant {
        let mut config = Config::minimal();
        config.backend.provider = "disabled".to_string();
        ClinicalAssistant::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn status_when_disabled() {
        let status = offline().status().await;
        assert!(!status.available);
        assert_eq!(status.provider, "disabled");
        assert!(status.models.is_none());
        assert!(status.features.drug_interaction_check);
        assert!(!status.features.semantic_search);

        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("models").is_none());
    }

    #[tokio::test]
    async fn suggestion_is_checked_against_current_medications() {
        let req = PrescriptionRequest {
            diagnosis: "pain".to_string(),
            current_medications: vec!["warfarin".to_string()],
            ..Default::default()
        };
        let res = offline().suggest_prescription(&req).await;
        assert!(res.success);
        assert_eq!(res.suggestion.as_ref().unwrap().medication, "acetaminophen");
        let check = res.interaction_check.expect("interaction check attached");
        assert_eq!(check.medications_checked, vec!["warfarin", "acetaminophen"]);
        assert!(check.safe);
    }

    #[tokio::test]
    async fn ai_suggestion_conflict_is_flagged() {
        let backend = Arc::new(ScriptedBackend::replying(
            r#"{"medication": "Ibuprofen", "dosage": "400mg"}"#,
        ));
        let mut config = Config::minimal();
        config.backend.provider = "disabled".to_string();
        let assistant = ClinicalAssistant::with_backend(&config, backend.clone()).unwrap();

        let req = PrescriptionRequest {
            diagnosis: "pain".to_string(),
            current_medications: vec!["warfarin".to_string()],
            ..Default::default()
        };
        let res = assistant.suggest_prescription(&req).await;
        let check = res.interaction_check.unwrap();
        assert_eq!(check.severity, Severity::High);
        assert!(!check.safe);
        // rules only: the backend saw the suggestion prompt and nothing else
        assert_eq!(backend.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_check_without_current_medications() {
        let req = PrescriptionRequest {
            diagnosis: "hypertension".to_string(),
            ..Default::default()
        };
        let res = offline().suggest_prescription(&req).await;
        assert!(res.success);
        assert!(res.interaction_check.is_none());
    }

    #[tokio::test]
    async fn no_check_when_ai_names_no_medication() {
        let backend = Arc::new(ScriptedBackend::replying(r#"{"dosage": "400mg"}"#));
        let mut config = Config::minimal();
        config.backend.provider = "disabled".to_string();
        let assistant = ClinicalAssistant::with_backend(&config, backend).unwrap();

        let req = PrescriptionRequest {
            diagnosis: "pain".to_string(),
            current_medications: vec!["warfarin".to_string()],
            ..Default::default()
        };
        let res = assistant.suggest_prescription(&req).await;
        assert!(res.success);
        assert_eq!(res.suggestion.unwrap().medication, CONSULT_PHYSICIAN);
        assert!(res.interaction_check.is_none());
    }

    #[tokio::test]
    async fn no_check_on_failed_suggestion() {
        let req = PrescriptionRequest {
            diagnosis: "fractured femur".to_string(),
            current_medications: vec!["warfarin".to_string()],
            ..Default::default()
        };
        let res = offline().suggest_prescription(&req).await;
        assert!(!res.success);
        assert!(res.interaction_check.is_none());
    }

    #[tokio::test]
    async fn ask_uses_default_subject() {
        let res = offline().ask_about_patient("any allergies?", &[], None).await;
        assert!(res.answer.contains("the patient's records"));
    }

    #[test]
    fn override_paths_are_honoured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guidelines.toml");
        std::fs::write(
            &path,
            "[[condition]]\nname = \"gout\"\nfirst_line = [\"colchicine\"]\n",
        )
        .unwrap();

        let mut config = Config::minimal();
        config.backend.provider = "disabled".to_string();
        config.reference.guidelines_path = Some(path);
        assert!(ClinicalAssistant::from_config(&config).is_ok());

        config.reference.guidelines_path = Some(dir.path().join("missing.toml"));
        assert!(ClinicalAssistant::from_config(&config).is_err());
    }
}
