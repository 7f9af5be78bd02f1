//! Deterministic offline embedder.
//!
//! Signed feature hashing over sha-256 token digests: no model download, no
//! network, bit-identical output across runs and platforms. Quality is far
//! below a learned model, but shared-vocabulary texts land close together,
//! which is exactly what the test suite and degraded environments need.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::Embedder;
use crate::error::Result;
use crate::stats;

/// Default output dimensionality.
pub const DEFAULT_DIM: usize = 256;

/// Bag-of-words embedder using a signed hashing trick.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIM)
    }
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let h = u64::from_le_bytes(digest[..8].try_into().unwrap());
            let bucket = (h % self.dim as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        stats::l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model_id(&self) -> &str {
        "hashing-bow-sha256"
    }
}
