use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use model2vec_rs::model::StaticModel;
use tokio::sync::OnceCell;

/// Opaque embedding provider: text in, fixed-dimension vector out.
///
/// Empty input yields a zero vector of the provider's dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn dimension(&self) -> Result<usize>;
}

/// Default provider backed by a Model2Vec static model, loaded lazily on
/// first use and shared across callers.
pub struct StaticEmbedder {
    model_id: String,
    model: Arc<OnceCell<Arc<StaticModel>>>,
}

impl StaticEmbedder {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            model: Arc::new(OnceCell::new()),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn get_model(&self) -> Result<Arc<StaticModel>> {
        let model_id = self.model_id.clone();
        let model = self
            .model
            .get_or_try_init(|| async move {
                tracing::info!("Loading embedding model: {}", model_id);
                tokio::task::spawn_blocking(move || {
                    StaticModel::from_pretrained(&model_id, None, None, None)
                        .map(Arc::new)
                        .with_context(|| format!("Failed to load embedding model '{}'", model_id))
                })
                .await?
            })
            .await?;
        Ok(model.clone())
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            let dim = self.dimension().await?;
            return Ok(vec![0.0; dim]);
        }
        let model = self.get_model().await?;
        let text_owned = text.to_string();
        let embedding = tokio::task::spawn_blocking(move || model.encode_single(&text_owned))
            .await
            .context("embedding task failed")?;
        Ok(embedding)
    }

    async fn dimension(&self) -> Result<usize> {
        let model = self.get_model().await?;
        let probe = tokio::task::spawn_blocking(move || model.encode_single("dimension probe"))
            .await
            .context("dimension probe failed")?;
        Ok(probe.len())
    }
}

/// Deterministic hashing embedder for tests: token hashes bucketed into a
/// small fixed dimension, so similar texts share buckets without any model
/// download. Integration tests define their own double on the `Embedder`
/// trait; this one serves the in-crate unit tests.
#[cfg(test)]
pub struct HashEmbedder {
    pub dim: usize,
}

#[cfg(test)]
#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dim];
        if text.trim().is_empty() {
            return Ok(v);
        }
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() >= 2)
        {
            let mut h: u64 = 0xcbf29ce484222325;
            for b in token.bytes() {
                h ^= b as u64;
                h = h.wrapping_mul(0x100000001b3);
            }
            v[(h % self.dim as u64) as usize] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }

    async fn dimension(&self) -> Result<usize> {
        Ok(self.dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalized() {
        let e = HashEmbedder { dim: 32 };
        let a = e.embed("install the package").await.unwrap();
        let b = e.embed("install the package").await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_input_is_a_zero_vector() {
        let e = HashEmbedder { dim: 8 };
        let v = e.embed("   ").await.unwrap();
        assert_eq!(v, vec![0.0; 8]);
    }

    #[tokio::test]
    async fn similar_texts_are_closer_than_unrelated() {
        let e = HashEmbedder { dim: 64 };
        let a = e.embed("how to install the package").await.unwrap();
        let b = e.embed("install the package quickly").await.unwrap();
        let c = e.embed("unrelated zebra migration patterns").await.unwrap();
        let dot = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(p, q)| p * q).sum::<f32>();
        assert!(dot(&a, &b) > dot(&a, &c));
    }
}
