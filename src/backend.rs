//! Generative backend abstraction and implementations.
//!
//! Defines the [`GenerativeBackend`] trait (text generation + embeddings)
//! and its concrete implementations:
//! - **[`DisabledBackend`]**: fails every call; the components fall back
//!   to keyword search and guideline tables.
//! - **[`OllamaBackend`]**: calls a local Ollama instance.
//!
//! The backend is an injected dependency: components hold an
//! `Arc<dyn GenerativeBackend>`, and tests substitute a scripted fake.
//!
//! # Failure policy
//!
//! Every call is a single request with a bounded timeout. There are no
//! retries: a failed call is returned once as a [`BackendError`] and the
//! caller degrades immediately.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BackendConfig;
use crate::error::BackendError;

/// One text-generation call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    /// Falls back to `backend.max_tokens` when unset.
    pub max_tokens: Option<u32>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Text generation and embedding capability consumed by the reasoning components.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Provider identifier (e.g. `"ollama"`).
    fn name(&self) -> &str;
    fn chat_model(&self) -> &str;
    fn embedding_model(&self) -> &str;

    async fn generate_text(&self, req: &GenerateRequest) -> Result<String, BackendError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;

    /// Cheap reachability probe.
    async fn is_available(&self) -> bool;

    async fn list_models(&self) -> Result<Vec<String>, BackendError>;
}

// ============ Disabled Backend ============

/// A backend that is never available.
///
/// Used when `backend.provider = "disabled"`.
pub struct DisabledBackend;

#[async_trait]
impl GenerativeBackend for DisabledBackend {
    fn name(&self) -> &str {
        "disabled"
    }
    fn chat_model(&self) -> &str {
        "disabled"
    }
    fn embedding_model(&self) -> &str {
        "disabled"
    }

    async fn generate_text(&self, _req: &GenerateRequest) -> Result<String, BackendError> {
        Err(BackendError::Disabled)
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
        Err(BackendError::Disabled)
    }

    async fn is_available(&self) -> bool {
        false
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        Err(BackendError::Disabled)
    }
}

// ============ Ollama Backend ============

/// Backend talking to a local Ollama instance.
///
/// - `POST /api/generate`: non-streaming completion
/// - `POST /api/embeddings`: single-text embedding
/// - `GET /api/tags`: availability probe and model listing
pub struct OllamaBackend {
    client: reqwest::Client,
    url: String,
    chat_model: String,
    embedding_model: String,
    generate_timeout_secs: u64,
    embed_timeout_secs: u64,
    status_timeout_secs: u64,
    max_tokens: u32,
}

impl OllamaBackend {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            generate_timeout_secs: config.generate_timeout_secs,
            embed_timeout_secs: config.embed_timeout_secs,
            status_timeout_secs: config.status_timeout_secs,
            max_tokens: config.max_tokens,
        })
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
        timeout_secs: u64,
    ) -> Result<serde_json::Value, BackendError> {
        let response = self
            .client
            .post(format!("{}{}", self.url, path))
            .timeout(Duration::from_secs(timeout_secs))
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                code: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::from_reqwest(e, timeout_secs))
    }

    async fn fetch_tags(&self) -> Result<serde_json::Value, BackendError> {
        let timeout_secs = self.status_timeout_secs;
        let response = self
            .client
            .get(format!("{}/api/tags", self.url))
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                code: status.as_u16(),
                body: String::new(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::from_reqwest(e, timeout_secs))
    }
}

#[async_trait]
impl GenerativeBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }
    fn chat_model(&self) -> &str {
        &self.chat_model
    }
    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    async fn generate_text(&self, req: &GenerateRequest) -> Result<String, BackendError> {
        let mut body = serde_json::json!({
            "model": self.chat_model,
            "prompt": req.prompt,
            "stream": false,
            "options": {
                "temperature": req.temperature,
                "num_predict": req.max_tokens.unwrap_or(self.max_tokens),
            }
        });
        if let Some(system) = &req.system_prompt {
            body["system"] = serde_json::Value::String(system.clone());
        }

        let json = self
            .post_json("/api/generate", &body, self.generate_timeout_secs)
            .await?;
        parse_generate_response(&json)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let body = serde_json::json!({
            "model": self.embedding_model,
            "prompt": text,
        });

        let json = self
            .post_json("/api/embeddings", &body, self.embed_timeout_secs)
            .await?;
        parse_embedding_response(&json)
    }

    async fn is_available(&self) -> bool {
        self.fetch_tags().await.is_ok()
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let json = self.fetch_tags().await?;
        Ok(parse_tags_response(&json))
    }
}

fn parse_generate_response(json: &serde_json::Value) -> Result<String, BackendError> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| BackendError::InvalidResponse("missing response field".to_string()))
}

fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>, BackendError> {
    let values = json
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| BackendError::InvalidResponse("missing embedding array".to_string()))?;

    let vec = values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| BackendError::InvalidResponse("non-numeric embedding value".to_string()))
        })
        .collect::<Result<Vec<f32>, _>>()?;

    if vec.is_empty() {
        return Err(BackendError::InvalidResponse("empty embedding".to_string()));
    }
    Ok(vec)
}

fn parse_tags_response(json: &serde_json::Value) -> Vec<String> {
    json.get("models")
        .and_then(|m| m.as_array())
        .map(|models| {
            models
                .iter()
                .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// Create the backend selected by `backend.provider`.
///
/// | Config Value | Backend |
/// |-------------|---------|
/// | `"disabled"` | [`DisabledBackend`] |
/// | `"ollama"` | [`OllamaBackend`] |
pub fn create_backend(config: &BackendConfig) -> Result<Arc<dyn GenerativeBackend>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledBackend)),
        "ollama" => Ok(Arc::new(OllamaBackend::new(config)?)),
        other => bail!("Unknown backend provider: {}", other),
    }
}
