//! Embedding provider trait and vector utilities.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the `lawdex` app
//! crate. Retries are not a provider concern: the build orchestrator wraps
//! [`EmbeddingProvider::embed`] in its own bounded backoff loop.

use anyhow::Result;
use async_trait::async_trait;

/// An external text → vector model.
///
/// `embed` returns one vector per input, in input order, each exactly
/// [`dims`](EmbeddingProvider::dims) long. A failed call must not have side
/// effects; the caller simply retries or gives up.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"bge-m3"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1024`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use lawdex_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip_preserves_bits() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001, f32::MIN_POSITIVE];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn trailing_partial_float_is_ignored() {
        let mut blob = vec_to_blob(&[0.5]);
        blob.push(0xff);
        assert_eq!(blob_to_vec(&blob), vec![0.5]);
    }
}
