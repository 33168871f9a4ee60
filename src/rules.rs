//! Interaction rule store: known pairwise interactions plus drug classes.
//!
//! The tables are data, not code. The bundled copy lives in
//! `data/interactions.toml` and is compiled in; a replacement file can be
//! supplied via `reference.interactions_path`. Once loaded the store is
//! read-only and shared behind an `Arc`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::models::Severity;

const BUNDLED: &str = include_str!("../data/interactions.toml");

#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRule {
    pub severity: Severity,
    pub warning: String,
}

#[derive(Debug, Clone)]
pub struct DrugClass {
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    interaction: Vec<RuleEntry>,
    #[serde(default)]
    class: Vec<ClassEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    drugs: Vec<String>,
    severity: Severity,
    warning: String,
}

#[derive(Debug, Deserialize)]
struct ClassEntry {
    name: String,
    members: Vec<String>,
}

/// Read-only interaction tables.
#[derive(Debug, Clone)]
pub struct InteractionRuleStore {
    /// Keyed in storage order; [`lookup`](Self::lookup) tries both orders.
    rules: HashMap<(String, String), InteractionRule>,
    /// In file order; the first class listing a drug wins.
    classes: Vec<DrugClass>,
}

impl InteractionRuleStore {
    /// The tables bundled with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUNDLED).context("bundled interaction table is invalid")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read interaction table: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse interaction table: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: RuleFile = toml::from_str(content)?;

        let mut rules = HashMap::with_capacity(file.interaction.len());
        for entry in file.interaction {
            let [a, b] = entry.drugs.as_slice() else {
                bail!(
                    "interaction rule must name exactly two drugs, got {:?}",
                    entry.drugs
                );
            };
            rules.insert(
                (normalize(a), normalize(b)),
                InteractionRule {
                    severity: entry.severity,
                    warning: entry.warning,
                },
            );
        }

        let classes = file
            .class
            .into_iter()
            .map(|c| DrugClass {
                name: normalize(&c.name),
                members: c.members.iter().map(|m| normalize(m)).collect(),
            })
            .collect();

        Ok(Self { rules, classes })
    }

    /// Look up a rule for an unordered pair of normalized names.
    pub fn lookup(&self, a: &str, b: &str) -> Option<&InteractionRule> {
        self.rules
            .get(&(a.to_string(), b.to_string()))
            .or_else(|| self.rules.get(&(b.to_string(), a.to_string())))
    }

    /// Class a normalized drug name belongs to, e.g. `fluoxetine` → `ssri`.
    pub fn class_of(&self, drug: &str) -> Option<&str> {
        self.classes
            .iter()
            .find(|c| c.members.iter().any(|m| m == drug))
            .map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Lower-case and trim a drug name.
pub fn normalize(drug: &str) -> String {
    drug.trim().to_lowercase()
}
