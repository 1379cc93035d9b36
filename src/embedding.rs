//! Text-to-vector pipeline over the external generator.
//!
//! The [`Embedder`] batches requests (at most [`MAX_BATCH`] texts per wire
//! call) and degrades instead of failing: on generator error it returns an
//! all-zero vector of the configured dimension. A zero vector scores 0
//! under cosine similarity, so callers treat it as a "no-similarity"
//! sentinel — the embedding worker additionally refuses to activate an
//! episode carrying one.

use std::sync::Arc;

use crate::generator::{EmbeddingTask, Generator};

/// Maximum texts per embed request; longer batches are split.
pub const MAX_BATCH: usize = 250;

/// Batched embedding client with a fixed output dimension.
#[derive(Clone)]
pub struct Embedder {
    generator: Arc<dyn Generator>,
    dim: usize,
}

impl Embedder {
    pub fn new(generator: Arc<dyn Generator>, dim: usize) -> Self {
        Self { generator, dim }
    }

    /// The configured embedding dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Whether a vector is the zero sentinel (or the wrong dimension,
    /// which callers must treat the same way).
    pub fn is_zero(&self, vector: &[f32]) -> bool {
        vector.len() != self.dim || vector.iter().all(|v| *v == 0.0)
    }

    fn zero(&self) -> Vec<f32> {
        vec![0.0; self.dim]
    }

    /// Embed one text. Never fails; a generator error yields the zero
    /// sentinel and a log line.
    pub async fn embed(&self, text: &str, task: EmbeddingTask) -> Vec<f32> {
        match self.generator.embed(text, task).await {
            Ok(vector) if vector.len() == self.dim => vector,
            Ok(vector) => {
                tracing::warn!(
                    expected = self.dim,
                    actual = vector.len(),
                    "embedding dimension mismatch"
                );
                self.zero()
            }
            Err(error) => {
                tracing::warn!(%error, "embedding failed");
                self.zero()
            }
        }
    }

    /// Embed a batch of texts, splitting into chunks of [`MAX_BATCH`].
    /// Output order matches input; failed chunks come back as zero
    /// sentinels.
    pub async fn embed_batch(&self, texts: &[String], task: EmbeddingTask) -> Vec<Vec<f32>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH) {
            match self.generator.embed_batch(chunk, task).await {
                Ok(batch) if batch.len() == chunk.len() => {
                    for vector in batch {
                        if vector.len() == self.dim {
                            vectors.push(vector);
                        } else {
                            vectors.push(self.zero());
                        }
                    }
                }
                Ok(batch) => {
                    tracing::warn!(
                        expected = chunk.len(),
                        actual = batch.len(),
                        "embed batch came back short"
                    );
                    vectors.extend(std::iter::repeat_with(|| self.zero()).take(chunk.len()));
                }
                Err(error) => {
                    tracing::warn!(%error, "embed batch failed");
                    vectors.extend(std::iter::repeat_with(|| self.zero()).take(chunk.len()));
                }
            }
        }
        vectors
    }
}
