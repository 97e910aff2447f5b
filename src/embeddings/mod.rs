// Embeddings module
// Text-to-vector encoding and the similarity functions shared with the store

pub mod encoder;
pub mod ollama;
pub mod similarity;

pub use encoder::{EncodedBatch, MAX_TEXTS_PER_CALL, VectorEncoder};
pub use ollama::{ModelInfo, OllamaModel};
pub use similarity::SimilarityMetric;

/// A text embedding model.
///
/// Implementations are blocking and are invoked from tokio's blocking pool by
/// [`VectorEncoder`]. They must tolerate being called from several threads at
/// once; a model that cannot should serialize access internally.
pub trait EmbeddingModel: Send + Sync {
    /// Identity recorded next to every vector this model produces.
    fn model_name(&self) -> &str;

    /// Length of the vectors returned by [`EmbeddingModel::encode`].
    fn embedding_dimension(&self) -> usize;

    /// Encode `texts`, returning exactly one vector per input in input order.
    fn encode(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}
