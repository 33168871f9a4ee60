//! In-process generative backend for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use clinical_assist::backend::{GenerateRequest, GenerativeBackend};
use clinical_assist::error::BackendError;
use std::sync::Mutex;

/// Scripted backend: generation returns `reply` (or fails when `None`),
/// embedding returns the vector of the first key contained in the text.
pub struct FakeBackend {
    pub available: bool,
    pub reply: Option<String>,
    pub vectors: Vec<(String, Vec<f32>)>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            available: true,
            reply: None,
            vectors: Vec::new(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(mut self, reply: &str) -> Self {
        self.reply = Some(reply.to_string());
        self
    }

    pub fn vector(mut self, key: &str, vector: Vec<f32>) -> Self {
        self.vectors.push((key.to_string(), vector));
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn prompt_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl GenerativeBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn chat_model(&self) -> &str {
        "fake-chat"
    }

    fn embedding_model(&self) -> &str {
        "fake-embed"
    }

    async fn generate_text(&self, req: &GenerateRequest) -> Result<String, BackendError> {
        self.prompts.lock().unwrap().push(req.prompt.clone());
        self.reply
            .clone()
            .ok_or_else(|| BackendError::Connection("connection refused".to_string()))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        self.vectors
            .iter()
            .find(|(key, _)| text.contains(key.as_str()))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| BackendError::Connection("connection refused".to_string()))
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        Ok(vec!["fake-chat".to_string(), "fake-embed".to_string()])
    }
}
