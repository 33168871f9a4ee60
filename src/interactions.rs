//! Drug-drug and drug-allergy interaction checking.
//!
//! A check runs fixed stages in order, each only appending findings:
//!
//! 1. normalize names (lower-case, trim, drop blanks and repeats)
//! 2. add the drug class of each drug to the candidate set
//! 3. scan every unordered candidate pair against the rule store
//! 4. cross-check allergies against medications (substring, both ways)
//! 5. optionally ask the backend for its own analysis and merge the
//!    pairs it found that the earlier stages did not
//!
//! The verdict severity is the maximum over all findings.
//!
//! The allergy match in stage 4 is deliberately permissive: `"profen"`
//! flags `"ibuprofen"`. It over-triggers rather than misses.

use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::{GenerateRequest, GenerativeBackend};
use crate::json_reply::{lenient_items, lenient_string, lenient_strings, parse_json_reply};
use crate::models::{
    sorted_pair, FindingSource, InteractionFinding, InteractionVerdict, Severity,
};
use crate::rules::{normalize, InteractionRuleStore};

const SYSTEM_PROMPT: &str = "You are a clinical pharmacist assistant. Analyze drug interactions and provide safety information.
Be concise and factual. Focus on clinically significant interactions.
Always respond in valid JSON format.";

/// The reply shape requested from the backend. Fields decode leniently:
/// a mistyped field or entry is dropped, the rest of the analysis is kept.
#[derive(Debug, Default, Deserialize)]
pub struct LlmAnalysis {
    #[serde(default, deserialize_with = "lenient_items")]
    pub interactions: Vec<LlmInteraction>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub allergy_concerns: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub general_advice: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LlmInteraction {
    #[serde(default, deserialize_with = "lenient_strings")]
    pub drugs: Vec<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub severity: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub warning: Option<String>,
}

pub struct InteractionChecker {
    rules: Arc<InteractionRuleStore>,
    backend: Arc<dyn GenerativeBackend>,
}

impl InteractionChecker {
    pub fn new(rules: Arc<InteractionRuleStore>, backend: Arc<dyn GenerativeBackend>) -> Self {
        Self { rules, backend }
    }

    pub async fn check_interactions(
        &self,
        medications: &[String],
        allergies: &[String],
        use_llm: bool,
    ) -> InteractionVerdict {
        let medications: Vec<String> = medications
            .iter()
            .filter(|m| !m.trim().is_empty())
            .cloned()
            .collect();
        if medications.is_empty() {
            return InteractionVerdict::empty(allergies);
        }

        let mut verdict = InteractionVerdict {
            medications_checked: medications.clone(),
            allergies_considered: allergies.to_vec(),
            safe: true,
            ..Default::default()
        };

        verdict.extend(self.rule_findings(&medications));
        verdict.extend(allergy_findings(&medications, allergies));

        if use_llm {
            if let Some(analysis) = self.llm_analysis(&medications, allergies).await {
                merge_llm_analysis(&mut verdict, analysis);
            }
        }

        debug!(
            medications = verdict.medications_checked.len(),
            findings = verdict.findings.len(),
            severity = ?verdict.severity,
            "interaction check finished"
        );
        verdict
    }

    /// Rule-store hits for every unordered pair of drugs and their classes.
    pub fn rule_findings(&self, medications: &[String]) -> Vec<InteractionFinding> {
        let mut candidates: Vec<String> = Vec::new();
        for drug in medications.iter().map(|m| normalize(m)) {
            if !candidates.contains(&drug) {
                candidates.push(drug);
            }
        }
        let classes: Vec<String> = candidates
            .iter()
            .filter_map(|d| self.rules.class_of(d))
            .map(|c| c.to_string())
            .collect();
        for class in classes {
            if !candidates.contains(&class) {
                candidates.push(class);
            }
        }

        let mut seen = HashSet::new();
        let mut findings = Vec::new();
        for (i, a) in candidates.iter().enumerate() {
            for b in &candidates[i + 1..] {
                let Some(rule) = self.rules.lookup(a, b) else {
                    continue;
                };
                if seen.insert(sorted_pair(a, b)) {
                    findings.push(InteractionFinding {
                        drugs: vec![a.clone(), b.clone()],
                        severity: rule.severity,
                        warning: rule.warning.clone(),
                        source: FindingSource::Database,
                    });
                }
            }
        }
        findings
    }

    async fn llm_analysis(&self, medications: &[String], allergies: &[String]) -> Option<LlmAnalysis> {
        if !self.backend.is_available().await {
            debug!("backend unavailable, skipping AI interaction analysis");
            return None;
        }

        let request = GenerateRequest::new(build_prompt(medications, allergies))
            .system(SYSTEM_PROMPT)
            .temperature(0.3);

        let reply = match self.backend.generate_text(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "AI interaction analysis failed");
                return None;
            }
        };

        match parse_json_reply::<LlmAnalysis>(&reply) {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                warn!(error = %e, "could not parse AI interaction analysis");
                None
            }
        }
    }
}

/// A `critical` finding for every allergy/medication pair where either
/// name contains the other, case-insensitively. Blank allergies are ignored.
pub fn allergy_findings(medications: &[String], allergies: &[String]) -> Vec<InteractionFinding> {
    let mut findings = Vec::new();
    for allergy in allergies {
        let allergy_lower = allergy.trim().to_lowercase();
        if allergy_lower.is_empty() {
            continue;
        }
        for med in medications {
            let med_lower = med.trim().to_lowercase();
            if med_lower.contains(&allergy_lower) || allergy_lower.contains(&med_lower) {
                findings.push(InteractionFinding {
                    drugs: vec![med.clone()],
                    severity: Severity::Critical,
                    warning: format!("Patient has documented allergy to {}!", allergy.trim()),
                    source: FindingSource::AllergyCheck,
                });
            }
        }
    }
    findings
}

/// Merge the backend's analysis into a verdict.
///
/// Only two-drug interactions whose sorted pair is not already present
/// (from any source) are appended. Each allergy concern becomes a
/// drug-less `moderate` finding. Unrecognised severities count as `moderate`.
pub fn merge_llm_analysis(verdict: &mut InteractionVerdict, analysis: LlmAnalysis) {
    let mut existing: HashSet<(String, String)> = verdict
        .findings
        .iter()
        .filter_map(|f| f.pair_key())
        .map(|(a, b)| (normalize(&a), normalize(&b)))
        .map(|(a, b)| sorted_pair(&a, &b))
        .collect();

    for interaction in analysis.interactions {
        let drugs: Vec<String> = interaction.drugs.iter().map(|d| normalize(d)).collect();
        let [a, b] = drugs.as_slice() else {
            continue;
        };
        if a.is_empty() || b.is_empty() || a == b {
            continue;
        }
        if !existing.insert(sorted_pair(a, b)) {
            continue;
        }

        let severity = interaction
            .severity
            .as_deref()
            .and_then(Severity::parse)
            .unwrap_or(Severity::Moderate);
        let warning = interaction
            .warning
            .filter(|w| !w.trim().is_empty())
            .unwrap_or_else(|| "Potential interaction identified by AI analysis.".to_string());

        verdict.push(InteractionFinding {
            drugs,
            severity,
            warning,
            source: FindingSource::AiAnalysis,
        });
    }

    for concern in analysis.allergy_concerns {
        let concern = concern.trim();
        if concern.is_empty() {
            continue;
        }
        verdict.push(InteractionFinding {
            drugs: Vec::new(),
            severity: Severity::Moderate,
            warning: concern.to_string(),
            source: FindingSource::AiAnalysis,
        });
    }

    verdict.general_advice = analysis
        .general_advice
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());
}

fn build_prompt(medications: &[String], allergies: &[String]) -> String {
    let allergies_text = if allergies.is_empty() {
        String::new()
    } else {
        format!("\nPatient allergies: {}", allergies.join(", "))
    };

    format!(
        r#"Analyze these medications for potential interactions:
Medications: {}{}

Respond in this exact JSON format:
{{
    "interactions_found": true/false,
    "interactions": [
        {{
            "drugs": ["drug1", "drug2"],
            "severity": "low/moderate/high/critical",
            "warning": "brief explanation"
        }}
    ],
    "allergy_concerns": ["list any allergy-related concerns"],
    "general_advice": "brief general advice"
}}"#,
        medications.join(", "),
        allergies_text
    )
}
