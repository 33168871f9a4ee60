use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_generate_timeout")]
    pub generate_timeout_secs: u64,
    #[serde(default = "default_embed_timeout")]
    pub embed_timeout_secs: u64,
    #[serde(default = "default_status_timeout")]
    pub status_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: default_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            generate_timeout_secs: default_generate_timeout(),
            embed_timeout_secs: default_embed_timeout(),
            status_timeout_secs: default_status_timeout(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_chat_model() -> String {
    "llama3.2:latest".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_generate_timeout() -> u64 {
    120
}
fn default_embed_timeout() -> u64 {
    60
}
fn default_status_timeout() -> u64 {
    5
}
fn default_max_tokens() -> u32 {
    1000
}

impl BackendConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
    /// Records echoed back alongside a generated answer.
    #[serde(default = "default_supporting_records")]
    pub supporting_records: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_similarity: default_min_similarity(),
            supporting_records: default_supporting_records(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_min_similarity() -> f64 {
    0.3
}
fn default_supporting_records() -> usize {
    3
}

/// Optional replacements for the bundled reference tables.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReferenceConfig {
    #[serde(default)]
    pub interactions_path: Option<PathBuf>,
    #[serde(default)]
    pub guidelines_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    /// All-defaults configuration, used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.backend.provider.as_str() {
        "ollama" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown backend provider: '{}'. Must be ollama or disabled.",
            other
        ),
    }

    if config.backend.generate_timeout_secs == 0
        || config.backend.embed_timeout_secs == 0
        || config.backend.status_timeout_secs == 0
    {
        anyhow::bail!("backend timeouts must be > 0");
    }

    if config.backend.max_tokens == 0 {
        anyhow::bail!("backend.max_tokens must be > 0");
    }

    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retrieval.min_similarity) {
        anyhow::bail!("retrieval.min_similarity must be in [0.0, 1.0]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.backend.provider, "ollama");
        assert_eq!(config.backend.generate_timeout_secs, 120);
        assert_eq!(config.retrieval.top_k, 5);
        assert!((config.retrieval.min_similarity - 0.3).abs() < 1e-9);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config: Config = toml::from_str(
            r#"
[backend]
provider = "disabled"

[retrieval]
top_k = 8
"#,
        )
        .unwrap();
        assert!(!config.backend.is_enabled());
        assert_eq!(config.backend.chat_model, "llama3.2:latest");
        assert_eq!(config.retrieval.top_k, 8);
        assert_eq!(config.retrieval.supporting_records, 3);
    }

    #[test]
    fn rejects_unknown_provider() {
        let mut config = Config::minimal();
        config.backend.provider = "openai".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("Unknown backend provider"));
    }

    #[test]
    fn rejects_out_of_range_similarity() {
        let mut config = Config::minimal();
        config.retrieval.min_similarity = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_zero_top_k() {
        let mut config = Config::minimal();
        config.retrieval.top_k = 0;
        assert!(validate(&config).is_err());
    }
}
