//! Treatment guideline store: condition keyword → first-line medications.
//!
//! Loaded from `data/guidelines.toml` (bundled) or `reference.guidelines_path`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

const BUNDLED: &str = include_str!("../data/guidelines.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct ConditionGuideline {
    pub name: String,
    pub first_line: Vec<String>,
    #[serde(default)]
    pub typical_dosage: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct GuidelineFile {
    #[serde(default)]
    condition: Vec<ConditionGuideline>,
}

/// The guideline-derived candidate for a diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuidelineMatch {
    pub condition: String,
    pub medication: String,
    pub dosage: String,
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GuidelineStore {
    conditions: Vec<ConditionGuideline>,
}

impl GuidelineStore {
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUNDLED).context("bundled guideline table is invalid")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read guideline table: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse guideline table: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: GuidelineFile = toml::from_str(content)?;
        let mut conditions = Vec::with_capacity(file.condition.len());
        for mut c in file.condition {
            c.name = c.name.trim().to_lowercase();
            if c.name.is_empty() {
                bail!("guideline condition name must not be empty");
            }
            if c.first_line.is_empty() {
                bail!("condition '{}' has no first-line medication", c.name);
            }
            conditions.push(c);
        }
        Ok(Self { conditions })
    }

    /// Find the first condition that contains, or is contained in, the diagnosis.
    pub fn lookup(&self, diagnosis: &str) -> Option<GuidelineMatch> {
        let diagnosis = diagnosis.trim().to_lowercase();
        if diagnosis.is_empty() {
            return None;
        }

        let condition = self
            .conditions
            .iter()
            .find(|c| diagnosis.contains(&c.name) || c.name.contains(&diagnosis))?;

        let medication = condition.first_line[0].clone();
        let dosage = condition
            .typical_dosage
            .get(&medication)
            .cloned()
            .unwrap_or_else(|| "As directed".to_string());

        Some(GuidelineMatch {
            condition: condition.name.clone(),
            medication,
            dosage,
            alternatives: condition.first_line[1..].to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}
