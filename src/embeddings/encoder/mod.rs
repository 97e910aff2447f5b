
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::EmbeddingModel;
use super::similarity::{self, normalize_l2};
use crate::{Result, StoreError};

pub const MAX_TEXTS_PER_CALL: usize = 100;

/// Output of a single [`VectorEncoder::generate`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBatch {
    pub vectors: Vec<Vec<f32>>,
    pub model_name: String,
    pub embedding_dim: usize,
    pub processing_time: Duration,
}

/// Turns text into vectors with one configured model. Never persists anything.
#[derive(Clone)]
pub struct VectorEncoder {
    model: Arc<dyn EmbeddingModel>,
}

impl std::fmt::Debug for VectorEncoder {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorEncoder")
            .field("model_name", &self.model.model_name())
            .field("embedding_dimension", &self.model.embedding_dimension())
            .finish()
    }
}

impl VectorEncoder {
    #[inline]
    pub fn new(model: Arc<dyn EmbeddingModel>) -> Self {
        Self { model }
    }

    #[inline]
    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    #[inline]
    pub fn embedding_dimension(&self) -> usize {
        self.model.embedding_dimension()
    }

    /// Encode `texts` in chunks of `batch_size`, preserving input order.
    ///
    /// Inference runs on tokio's blocking pool so concurrent callers do not
    /// queue behind each other on the async executor.
    #[inline]
    pub async fn generate(
        &self,
        texts: &[String],
        batch_size: usize,
        normalize: bool,
    ) -> Result<EncodedBatch> {
        if texts.is_empty() || texts.len() > MAX_TEXTS_PER_CALL {
            return Err(StoreError::validation(format!(
                "Expected between 1 and {} texts, got {}",
                MAX_TEXTS_PER_CALL,
                texts.len()
            )));
        }
        if batch_size == 0 {
            return Err(StoreError::validation("Batch size must be at least 1"));
        }

        let started = Instant::now();
        let model_name = self.model.model_name().to_string();
        debug!(
            "Encoding {} texts with {} (batch size {})",
            texts.len(),
            model_name,
            batch_size
        );

        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size) {
            let model = Arc::clone(&self.model);
            let inputs = chunk.to_vec();
            let expected = inputs.len();

            let encoded = tokio::task::spawn_blocking(move || model.encode(&inputs))
                .await
                .map_err(|e| StoreError::Encoding(format!("Encoder worker failed: {}", e)))?
                .map_err(|e| StoreError::Encoding(format!("{:#}", e)))?;

            if encoded.len() != expected {
                return Err(StoreError::Encoding(format!(
                    "Model returned {} vectors for {} texts",
                    encoded.len(),
                    expected
                )));
            }
            vectors.extend(encoded);
        }

        let embedding_dim = vectors.first().map_or(0, Vec::len);
        if embedding_dim == 0 {
            return Err(StoreError::Encoding(
                "Model returned an empty vector".to_string(),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != embedding_dim) {
            return Err(StoreError::Encoding(format!(
                "Model returned inconsistent vector lengths: {} and {}",
                embedding_dim,
                bad.len()
            )));
        }
        if embedding_dim != self.model.embedding_dimension() {
            warn!(
                "Model {} declared dimension {} but produced {}",
                model_name,
                self.model.embedding_dimension(),
                embedding_dim
            );
        }

        if normalize {
            for vector in &mut vectors {
                normalize_l2(vector);
            }
        }

        let processing_time = started.elapsed();
        debug!(
            "Encoded {} vectors of dimension {} in {:?}",
            vectors.len(),
            embedding_dim,
            processing_time
        );

        Ok(EncodedBatch {
            vectors,
            model_name,
            embedding_dim,
            processing_time,
        })
    }

    /// Encode a single query string into a unit-length vector.
    #[inline]
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let batch = self.generate(&[text.to_string()], 1, true).await?;
        batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Encoding("Model returned no vectors".to_string()))
    }

    #[inline]
    pub fn compute_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
        similarity::cosine_similarity(a, b)
    }

    #[inline]
    pub fn batch_similarity(query: &[f32], candidates: &[Vec<f32>]) -> Result<Vec<f32>> {
        similarity::batch_cosine_similarity(query, candidates)
    }
}
