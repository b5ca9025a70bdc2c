//! Embedding adapter.
//!
//! The default embedder is a deterministic hashed bag-of-words: every token is
//! hashed into one of `dim` buckets and the resulting vector is L2-normalized.
//! It is stable across runs and processes, which keeps the fallback vector
//! store reproducible. A remote embedding model implements the same trait.

use sha2::{Digest, Sha256};

pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Vec<f64>;
}

/// Deterministic hashed bag-of-words embedder.
pub struct HashedEmbedder {
    dim: usize,
}

impl HashedEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        // First 8 bytes give a stable, well-mixed index.
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(raw) % self.dim as u64) as usize
    }
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self::new(128)
    }
}

impl Embedder for HashedEmbedder {
    fn dimensions(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Vec<f64> {
        let mut vec = vec![0.0f64; self.dim];
        for token in text.to_lowercase().split_whitespace() {
            vec[self.bucket(token)] += 1.0;
        }
        let norm = vec.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in &mut vec {
                *v /= norm;
            }
        }
        vec
    }
}

/// Cosine similarity over equal-length vectors; mismatched lengths score 0.
pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_is_deterministic() {
        let embedder = HashedEmbedder::new(128);
        assert_eq!(embedder.embed("icu stays by gender"), embedder.embed("icu stays by gender"));
    }

    #[test]
    fn embedding_is_normalized() {
        let embedder = HashedEmbedder::new(128);
        let vec = embedder.embed("count admissions per type");
        let norm: f64 = vec.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn identical_text_scores_highest() {
        let embedder = HashedEmbedder::new(128);
        let query = embedder.embed("average length of stay");
        let same = embedder.embed("average length of stay");
        let other = embedder.embed("microbiology organism counts");
        assert!(cosine(&query, &same) > cosine(&query, &other));
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = HashedEmbedder::new(16);
        assert!(embedder.embed("").iter().all(|v| *v == 0.0));
    }
}
