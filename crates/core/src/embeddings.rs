use crate::error::Result;
use crate::models::TokenUsage;
use async_trait::async_trait;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

#[derive(Debug, Clone)]
pub struct EmbeddingModelInfo {
    pub model: String,
    pub dimensions: usize,
    pub max_tokens: usize,
}

/// Vectors for one batched call, with the provider's token accounting.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub usage: TokenUsage,
}

/// Turns text into fixed-dimension vectors. Implementations batch
/// internally so callers may pass any number of texts; the provider
/// splits the input to respect its own batch limit.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let batch = self.embed(std::slice::from_ref(&text.to_string())).await?;
        Ok(batch.vectors.into_iter().next().unwrap_or_default())
    }

    fn model_info(&self) -> EmbeddingModelInfo;

    async fn health_check(&self) -> bool {
        true
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// Deterministic local embedder hashing character trigrams into a
/// normalized frequency vector. No external service, stable across
/// processes; suitable for development and tests.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    pub dimensions: usize,
    pub batch_size: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            batch_size: 64,
        }
    }
}

impl HashingEmbedder {
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            ..Self::default()
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            // FNV-1a over the trigram selects the bucket.
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        let mut vectors = Vec::with_capacity(texts.len());
        let mut approx_tokens = 0usize;

        for batch in texts.chunks(self.batch_size.max(1)) {
            for text in batch {
                approx_tokens += text.split_whitespace().count();
                vectors.push(self.embed_text(text));
            }
        }

        Ok(EmbeddingBatch {
            vectors,
            usage: TokenUsage {
                prompt_tokens: approx_tokens,
                completion_tokens: 0,
                total_tokens: approx_tokens,
            },
        })
    }

    fn model_info(&self) -> EmbeddingModelInfo {
        EmbeddingModelInfo {
            model: "hashing-trigram".to_string(),
            dimensions: self.dimensions,
            max_tokens: usize::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedder_is_deterministic() {
        let embedder = HashingEmbedder::default();
        let first = embedder.embed_one("minimum credit score for personal loans").await.unwrap();
        let second = embedder.embed_one("minimum credit score for personal loans").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn embedder_outputs_configured_dimensions() {
        let embedder = HashingEmbedder::with_dimensions(32);
        let batch = embedder
            .embed(&["abc".to_string(), "def".to_string()])
            .await
            .unwrap();
        assert_eq!(batch.vectors.len(), 2);
        assert!(batch.vectors.iter().all(|v| v.len() == 32));
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated() {
        let embedder = HashingEmbedder::default();
        let base = embedder.embed_one("credit score requirements").await.unwrap();
        let close = embedder.embed_one("credit score requirement").await.unwrap();
        let far = embedder.embed_one("zebra migration patterns").await.unwrap();
        assert!(cosine_similarity(&base, &close) > cosine_similarity(&base, &far));
    }

    #[test]
    fn cosine_of_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
