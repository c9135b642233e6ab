//! Deterministic offline embeddings.
//!
//! Each lower-cased alphanumeric token is hashed (FNV-1a) into one of `dim`
//! buckets with a hash-derived sign. Texts sharing vocabulary land close to
//! each other, which is enough for schema-card retrieval without a model.

use crate::{EmbeddingService, LlmError};
use async_trait::async_trait;

pub const DEFAULT_TOKEN_HASH_DIM: usize = 128;

fn fnv1a64(s: &str) -> u64 {
    let mut h: u64 = 14695981039346656037;
    for b in s.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(1099511628211);
    }
    h
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

#[derive(Debug, Clone, Copy)]
pub struct TokenHashEmbedder {
    dim: usize,
}

impl Default for TokenHashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_HASH_DIM)
    }
}

impl TokenHashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            let h = fnv1a64(&token);
            let idx = (h % (self.dim as u64)) as usize;
            let sign = if ((h >> 32) & 1) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm2: f32 = v.iter().map(|x| x * x).sum();
        if norm2 > 0.0 {
            let inv = 1.0f32 / norm2.sqrt();
            for x in v.iter_mut() {
                *x *= inv;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingService for TokenHashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(self.embed_text(text))
    }

    fn describe(&self) -> String {
        format!("token-hash:{}", self.dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identical_text_identical_vector() {
        let e = TokenHashEmbedder::default();
        assert_eq!(e.embed_text("Orders by Region"), e.embed_text("orders BY region"));
    }

    #[test]
    fn test_unit_norm() {
        let v = TokenHashEmbedder::new(64).embed_text("total revenue per customer");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let v = TokenHashEmbedder::new(8).embed_text("  ,;  ");
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
