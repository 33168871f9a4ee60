//! Vector utilities for stored record embeddings.
//!
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`decode_embedding`]: turn a caller-stored embedding into a vector
//! - [`encode_embedding`]: serialize a vector for the caller to persist
//!
//! Two serialized forms are understood: a JSON array (`"[0.1, 0.2]"`) and
//! a base64 little-endian `f32` blob prefixed with `b64:`.

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::models::StoredEmbedding;

const BLOB_PREFIX: &str = "b64:";

/// Serialization format for [`encode_embedding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingFormat {
    Json,
    Blob,
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` whenever either vector has zero norm, the vectors are
/// empty, or their lengths differ. Never panics, never returns NaN.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f64::EPSILON {
        return 0.0;
    }

    let sim = dot / denom;
    if sim.is_finite() {
        sim.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Decode a caller-stored embedding.
///
/// Errors mean the stored value is corrupt; the record should be left out
/// of ranking rather than scored as zero.
pub fn decode_embedding(stored: &StoredEmbedding) -> Result<Vec<f32>> {
    let vec = match stored {
        StoredEmbedding::Vector(v) => v.clone(),
        StoredEmbedding::Serialized(text) => {
            let text = text.trim();
            if let Some(encoded) = text.strip_prefix(BLOB_PREFIX) {
                let bytes = STANDARD
                    .decode(encoded)
                    .context("embedding blob is not valid base64")?;
                if bytes.len() % 4 != 0 {
                    bail!("embedding blob length {} is not a multiple of 4", bytes.len());
                }
                blob_to_vec(&bytes)
            } else {
                serde_json::from_str::<Vec<f32>>(text)
                    .context("embedding is not a JSON array of numbers")?
            }
        }
        StoredEmbedding::Corrupt(_) => {
            bail!("embedding is neither an array of numbers nor a string")
        }
    };

    if vec.is_empty() {
        bail!("embedding is empty");
    }
    if vec.iter().any(|v| !v.is_finite()) {
        bail!("embedding contains non-finite values");
    }
    Ok(vec)
}

/// Serialize a vector in one of the stored forms [`decode_embedding`] accepts.
pub fn encode_embedding(vec: &[f32], format: EmbeddingFormat) -> String {
    match format {
        EmbeddingFormat::Json => {
            serde_json::to_string(vec).unwrap_or_else(|_| "[]".to_string())
        }
        EmbeddingFormat::Blob => format!("{}{}", BLOB_PREFIX, STANDARD.encode(vec_to_blob(vec))),
    }
}

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes. Trailing partial chunks are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
