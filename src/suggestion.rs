//! Prescription suggestions: guideline lookup fused with an AI suggestion.
//!
//! The guideline table is always consulted first and its candidate is
//! kept as the fallback. The backend call then ends in one of three
//! [`AiOutcome`]s, and each maps to a distinct response shape:
//!
//! | Outcome | With guideline | Without guideline |
//! |---|---|---|
//! | `Parsed` | AI suggestion, `guideline_match = true` | AI suggestion, `guideline_match = false` |
//! | `Malformed` | guideline (plainer text), `ai_available`, `parse_error` | failure, `parse_error` |
//! | `Unreachable` | guideline, `!ai_available` | failure with the backend error |

use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::{GenerateRequest, GenerativeBackend};
use crate::error::{BackendError, ReplyParseError};
use crate::guidelines::{GuidelineMatch, GuidelineStore};
use crate::json_reply::{lenient_string, lenient_strings, parse_json_reply};
use crate::models::{
    InstructionsResponse, PrescriptionRequest, PrescriptionSuggestion, SuggestionResponse,
    SuggestionSource,
};

const SUGGEST_SYSTEM_PROMPT: &str = "You are a clinical decision support assistant helping doctors with prescription suggestions.
Provide evidence-based medication recommendations. Always consider patient safety.
Your suggestions are for review by a licensed physician - they will make the final decision.
Respond in valid JSON format only.";

const INSTRUCTIONS_SYSTEM_PROMPT: &str = "You are a helpful pharmacist assistant. Generate clear, patient-friendly medication instructions.
Use simple language. Include important safety information.";

/// Placeholder for a required field the model left out.
pub const CONSULT_PHYSICIAN: &str = "Consult physician";

/// The reply shape requested from the backend. Every field is optional
/// and decoded leniently, so one mistyped field never discards the rest.
#[derive(Debug, Default, Deserialize)]
struct AiSuggestion {
    #[serde(default, deserialize_with = "lenient_string")]
    medication: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    dosage: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    frequency: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    duration: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    instructions: Option<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    warnings: Vec<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    alternatives: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    reasoning: Option<String>,
}

/// How the backend leg of a suggestion ended.
enum AiOutcome {
    /// The call itself failed: disabled, timed out, refused, bad status.
    Unreachable(BackendError),
    /// The backend answered, but not with a usable JSON object.
    Malformed(ReplyParseError),
    Parsed(AiSuggestion),
}

pub struct PrescriptionAdvisor {
    guidelines: Arc<GuidelineStore>,
    backend: Arc<dyn GenerativeBackend>,
}

impl PrescriptionAdvisor {
    pub fn new(guidelines: Arc<GuidelineStore>, backend: Arc<dyn GenerativeBackend>) -> Self {
        Self {
            guidelines,
            backend,
        }
    }

    pub async fn suggest_prescription(&self, request: &PrescriptionRequest) -> SuggestionResponse {
        let guideline = self.guidelines.lookup(&request.diagnosis);
        debug!(
            diagnosis = %request.diagnosis,
            guideline = guideline.as_ref().map(|g| g.medication.as_str()),
            "suggesting prescription"
        );

        match self.ask_backend(request).await {
            AiOutcome::Parsed(ai) => SuggestionResponse {
                success: true,
                suggestion: Some(complete_ai_suggestion(ai)),
                source: Some(SuggestionSource::Ai),
                ai_available: true,
                parse_error: false,
                guideline_match: Some(guideline.is_some()),
                error: None,
                interaction_check: None,
            },
            AiOutcome::Malformed(e) => {
                warn!(error = %e, "AI suggestion was not valid JSON, using guidelines");
                match guideline {
                    Some(g) => guideline_response(g, true, true),
                    None => failure(true, true, "Failed to parse AI response".to_string()),
                }
            }
            AiOutcome::Unreachable(e) => {
                warn!(error = %e, "AI suggestion unavailable, using guidelines");
                match guideline {
                    Some(g) => guideline_response(g, false, false),
                    None => failure(false, false, e.to_string()),
                }
            }
        }
    }

    async fn ask_backend(&self, request: &PrescriptionRequest) -> AiOutcome {
        let req = GenerateRequest::new(build_suggestion_prompt(request))
            .system(SUGGEST_SYSTEM_PROMPT)
            .temperature(0.3);

        match self.backend.generate_text(&req).await {
            Err(e) => AiOutcome::Unreachable(e),
            Ok(reply) => match parse_json_reply::<AiSuggestion>(&reply) {
                Ok(ai) => AiOutcome::Parsed(ai),
                Err(e) => AiOutcome::Malformed(e),
            },
        }
    }

    /// Patient-friendly instructions. Never empty: a failed backend call
    /// yields a generic instruction line plus the error.
    pub async fn generate_instructions(
        &self,
        medication: &str,
        dosage: &str,
        diagnosis: &str,
        age: Option<u32>,
    ) -> InstructionsResponse {
        let req = GenerateRequest::new(build_instructions_prompt(medication, dosage, diagnosis, age))
            .system(INSTRUCTIONS_SYSTEM_PROMPT)
            .temperature(0.5);

        match self.backend.generate_text(&req).await {
            Ok(text) if !text.trim().is_empty() => InstructionsResponse {
                success: true,
                instructions: text,
                error: None,
            },
            Ok(_) => InstructionsResponse {
                success: false,
                instructions: generic_instructions(medication, dosage),
                error: Some("Failed to generate instructions".to_string()),
            },
            Err(e) => {
                warn!(error = %e, medication, "instruction generation failed");
                InstructionsResponse {
                    success: false,
                    instructions: generic_instructions(medication, dosage),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn complete_ai_suggestion(ai: AiSuggestion) -> PrescriptionSuggestion {
    PrescriptionSuggestion {
        medication: non_blank(ai.medication).unwrap_or_else(|| CONSULT_PHYSICIAN.to_string()),
        dosage: non_blank(ai.dosage).unwrap_or_else(|| CONSULT_PHYSICIAN.to_string()),
        frequency: ai.frequency.unwrap_or_default(),
        duration: ai.duration.unwrap_or_default(),
        instructions: ai.instructions.unwrap_or_default(),
        warnings: ai.warnings,
        alternatives: ai.alternatives,
        reasoning: ai.reasoning.unwrap_or_default(),
        source: SuggestionSource::Ai,
    }
}

/// The guideline candidate wrapped in generic dosing text, used when the
/// backend could not be reached.
pub fn guideline_suggestion(guideline: GuidelineMatch) -> PrescriptionSuggestion {
    PrescriptionSuggestion {
        medication: guideline.medication,
        dosage: guideline.dosage,
        frequency: "As directed by physician".to_string(),
        duration: "As prescribed".to_string(),
        instructions: "Take as directed. Contact doctor if symptoms persist.".to_string(),
        warnings: vec![
            "Review for drug interactions".to_string(),
            "Monitor for side effects".to_string(),
        ],
        alternatives: guideline.alternatives,
        reasoning: "Based on standard treatment guidelines".to_string(),
        source: SuggestionSource::Guidelines,
    }
}

/// The guideline candidate used when the backend answered with something
/// that was not a JSON object. Carries no warnings of its own.
pub fn unparsed_reply_suggestion(guideline: GuidelineMatch) -> PrescriptionSuggestion {
    PrescriptionSuggestion {
        medication: guideline.medication,
        dosage: guideline.dosage,
        frequency: "As directed".to_string(),
        duration: "As prescribed".to_string(),
        instructions: "Take as directed by your physician.".to_string(),
        warnings: Vec::new(),
        alternatives: guideline.alternatives,
        reasoning: "Based on treatment guidelines".to_string(),
        source: SuggestionSource::Guidelines,
    }
}

fn guideline_response(guideline: GuidelineMatch, ai_available: bool, parse_error: bool) -> SuggestionResponse {
    let suggestion = if parse_error {
        unparsed_reply_suggestion(guideline)
    } else {
        guideline_suggestion(guideline)
    };
    SuggestionResponse {
        success: true,
        suggestion: Some(suggestion),
        source: Some(SuggestionSource::Guidelines),
        ai_available,
        parse_error,
        guideline_match: None,
        error: None,
        interaction_check: None,
    }
}

fn failure(ai_available: bool, parse_error: bool, error: String) -> SuggestionResponse {
    SuggestionResponse {
        success: false,
        suggestion: None,
        source: None,
        ai_available,
        parse_error,
        guideline_match: None,
        error: Some(error),
        interaction_check: None,
    }
}

pub fn generic_instructions(medication: &str, dosage: &str) -> String {
    format!(
        "Take {medication} {dosage} as directed by your physician. Contact your doctor if you experience any adverse effects."
    )
}

fn build_suggestion_prompt(request: &PrescriptionRequest) -> String {
    let mut context = vec![format!("Diagnosis: {}", request.diagnosis)];
    if let Some(age) = request.age {
        context.push(format!("Patient age: {age}"));
    }
    if !request.allergies.is_empty() {
        context.push(format!("Allergies: {}", request.allergies.join(", ")));
    }
    if !request.current_medications.is_empty() {
        context.push(format!(
            "Current medications: {}",
            request.current_medications.join(", ")
        ));
    }
    if !request.conditions.is_empty() {
        context.push(format!("Other conditions: {}", request.conditions.join(", ")));
    }

    format!(
        r#"Based on the following patient information, suggest an appropriate prescription:

{}

Respond in this exact JSON format:
{{
    "medication": "drug name",
    "dosage": "specific dosage",
    "frequency": "how often to take",
    "duration": "length of treatment",
    "instructions": "patient instructions",
    "warnings": ["list of warnings or precautions"],
    "alternatives": ["alternative medications if first choice not suitable"],
    "reasoning": "brief clinical reasoning"
}}"#,
        context.join("\n")
    )
}

fn build_instructions_prompt(medication: &str, dosage: &str, diagnosis: &str, age: Option<u32>) -> String {
    let age_context = age
        .map(|a| format!(" for a {a}-year-old patient"))
        .unwrap_or_default();

    format!(
        "Generate patient instructions for:
Medication: {medication}
Dosage: {dosage}
Condition: {diagnosis}{age_context}

Include:
1. How to take the medication
2. When to take it
3. What to avoid
4. Side effects to watch for
5. When to contact the doctor

Keep it concise and easy to understand."
    )
}
