// Database module
// One storage interface with a SQLite adapter and an in-memory adapter

pub mod memory;
pub mod models;
pub(crate) mod search;
pub mod sqlite;

use async_trait::async_trait;

use crate::Result;

pub use memory::MemoryVectorStore;
pub use models::{
    EmbeddingKey, EmbeddingMetadataRecord, EmbeddingRecord, EmbeddingStats, Metadata,
    NewEmbedding, SearchHit, SearchQuery, metadata_from,
};
pub use sqlite::SqliteVectorStore;

/// Key-indexed persistence of embeddings plus brute-force similarity search.
///
/// The triple `(content_id, content_type, model_name)` is unique: storing an
/// existing key replaces its vector and metadata and keeps its id.
///
/// Search is a full scan over the filtered candidates. An approximate index
/// would be a separate implementation of this trait.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or update by key, returning the record's id.
    async fn store(&self, embedding: NewEmbedding) -> Result<i64>;

    /// Look up a record. Omitted filters widen the match; the lowest id wins
    /// when several records satisfy a partial key.
    async fn get(
        &self,
        content_id: &str,
        content_type: Option<&str>,
        model_name: Option<&str>,
    ) -> Result<Option<EmbeddingRecord>>;

    async fn get_by_id(&self, id: i64) -> Result<Option<EmbeddingRecord>>;

    async fn get_metadata(&self, embedding_id: i64) -> Result<Option<EmbeddingMetadataRecord>>;

    /// Replace the metadata of an existing record. Fails with
    /// [`crate::StoreError::NotFound`] when `key` is not stored.
    async fn update_metadata(&self, key: &EmbeddingKey, metadata: Metadata) -> Result<()>;

    /// Remove every record matching the (partial) key. Returns `false` if none did.
    async fn delete(
        &self,
        content_id: &str,
        content_type: Option<&str>,
        model_name: Option<&str>,
    ) -> Result<bool>;

    async fn delete_by_content_id(&self, content_id: &str) -> Result<u64>;

    async fn similarity_search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>>;

    /// Store every valid entry in one unit of work.
    ///
    /// A key repeated inside `embeddings` fails the whole call before anything
    /// is written; entries that fail validation are skipped.
    async fn batch_store(&self, embeddings: Vec<NewEmbedding>) -> Result<Vec<i64>>;

    /// Delete by id, returning how many existed.
    async fn batch_delete(&self, ids: &[i64]) -> Result<u64>;

    async fn stats(&self) -> Result<EmbeddingStats>;
}
