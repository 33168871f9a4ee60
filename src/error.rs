//! Typed errors for the generative backend seam and LLM reply parsing.
//!
//! Application edges (config, CLI, server start-up) use `anyhow`. These
//! two enums exist so the reasoning components can tell an unreachable
//! backend apart from a reachable one that produced garbage.

use thiserror::Error;

/// Failure of a single call to the generative backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("generative backend is disabled")]
    Disabled,

    #[error("request timed out after {0}s (model might be loading)")]
    Timeout(u64),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("backend returned status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Map a transport-level reqwest error, keeping timeouts distinct.
    pub fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            BackendError::Timeout(timeout_secs)
        } else if err.is_decode() {
            BackendError::InvalidResponse(err.to_string())
        } else {
            BackendError::Connection(err.to_string())
        }
    }
}

/// The model answered, but not with the JSON shape that was asked for.
#[derive(Debug, Error, PartialEq)]
pub enum ReplyParseError {
    #[error("no JSON object found in model reply")]
    NoJsonBlock,

    #[error("invalid JSON in model reply: {0}")]
    Decode(String),
}
