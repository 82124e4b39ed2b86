//! Text embedding providers for semantic search.
//!
//! Every provider produces vectors of one fixed length, matching the
//! dimension enforced on node ingestion.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Length of every vector returned by [`Self::embed`].
    fn dimensions(&self) -> usize;

    /// Embed one text.
    ///
    /// # Errors
    ///
    /// `Error::Collaborator` if a remote provider fails.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Deterministic feature-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed with SHA-256; the first eight
/// bytes pick a bucket and the ninth byte a sign. The vector is
/// L2-normalized, so texts sharing tokens have positive cosine similarity.
/// Needs no network access, which makes it suitable for tests and offline
/// indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    /// Create a provider producing `dimensions`-length vectors.
    ///
    /// A zero dimension is treated as one.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Synchronous form of [`EmbeddingProvider::embed`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimensions];

        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0_u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

/// Split on anything that is not alphanumeric, lowercased.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::cosine_similarity;

    #[test]
    fn vectors_have_fixed_length_and_unit_norm() {
        let provider = HashEmbeddingProvider::new(32);
        let vector = provider.embed_text("parse the config file");

        assert_eq!(vector.len(), 32);
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn embedding_is_deterministic() {
        let provider = HashEmbeddingProvider::new(16);
        assert_eq!(
            provider.embed_text("loadConfig"),
            provider.embed_text("loadConfig")
        );
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let provider = HashEmbeddingProvider::new(8);
        assert!(provider.embed_text("  ,; ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn shared_tokens_score_higher() {
        let provider = HashEmbeddingProvider::new(64);
        let query = provider.embed_text("user login handler");
        let close = provider.embed_text("login handler for user sessions");
        let far = provider.embed_text("render chart axis");

        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[tokio::test]
    async fn async_embed_matches_sync() {
        let provider = HashEmbeddingProvider::new(16);
        let vector = provider.embed("fetch user").await.expect("embed");
        assert_eq!(vector, provider.embed_text("fetch user"));
        assert_eq!(provider.dimensions(), 16);
    }
}
