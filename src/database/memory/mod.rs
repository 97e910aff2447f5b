
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use super::VectorStore;
use super::models::{
    EmbeddingKey, EmbeddingMetadataRecord, EmbeddingRecord, EmbeddingStats, Metadata,
    MetadataFields, NewEmbedding, SearchHit, SearchQuery, prepare_batch,
};
use super::search::{Candidate, Ranker};
use crate::{Result, StoreError};

/// [`VectorStore`] kept entirely in process memory.
///
/// All state sits behind one lock, so the unique-key check and the write it
/// guards happen atomically.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    next_metadata_id: i64,
    records: BTreeMap<i64, EmbeddingRecord>,
    keys: HashMap<EmbeddingKey, i64>,
    metadata: BTreeMap<i64, EmbeddingMetadataRecord>,
}

impl MemoryState {
    fn upsert(&mut self, embedding: NewEmbedding) -> i64 {
        let now = Utc::now();
        let key = embedding.key();
        let metadata = embedding.metadata.unwrap_or_default();
        let fields = MetadataFields::extract(&metadata);

        let id = if let Some(record) = self
            .keys
            .get(&key)
            .and_then(|id| self.records.get_mut(id))
        {
            record.replace(embedding.vector, metadata, now);
            record.id
        } else {
            self.next_id += 1;
            let id = self.next_id;
            self.records.insert(
                id,
                EmbeddingRecord::from_parts(id, key.clone(), embedding.vector, metadata, now, now),
            );
            self.keys.insert(key, id);
            id
        };

        self.write_metadata(id, fields);
        id
    }

    fn write_metadata(&mut self, embedding_id: i64, fields: MetadataFields) {
        let metadata_id = if let Some(existing) = self.metadata.get(&embedding_id) {
            existing.id
        } else {
            self.next_metadata_id += 1;
            self.next_metadata_id
        };
        self.metadata
            .insert(embedding_id, fields.into_record(metadata_id, embedding_id));
    }

    fn remove(&mut self, id: i64) -> bool {
        let Some(record) = self.records.remove(&id) else {
            return false;
        };
        self.keys.remove(&record.key());
        self.metadata.remove(&id);
        true
    }

    fn matching_ids(
        &self,
        content_id: &str,
        content_type: Option<&str>,
        model_name: Option<&str>,
    ) -> Vec<i64> {
        self.records
            .values()
            .filter(|r| r.matches(content_id, content_type, model_name))
            .map(|r| r.id)
            .collect()
    }
}

impl MemoryVectorStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn store(&self, embedding: NewEmbedding) -> Result<i64> {
        embedding.validate()?;
        debug!("Storing embedding {}", embedding.key());

        let mut state = self.state.write().await;
        Ok(state.upsert(embedding))
    }

    async fn get(
        &self,
        content_id: &str,
        content_type: Option<&str>,
        model_name: Option<&str>,
    ) -> Result<Option<EmbeddingRecord>> {
        let state = self.state.read().await;
        Ok(state
            .records
            .values()
            .find(|r| r.matches(content_id, content_type, model_name))
            .cloned())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<EmbeddingRecord>> {
        let state = self.state.read().await;
        Ok(state.records.get(&id).cloned())
    }

    async fn get_metadata(&self, embedding_id: i64) -> Result<Option<EmbeddingMetadataRecord>> {
        let state = self.state.read().await;
        Ok(state.metadata.get(&embedding_id).cloned())
    }

    async fn update_metadata(&self, key: &EmbeddingKey, metadata: Metadata) -> Result<()> {
        let mut state = self.state.write().await;
        let id = state
            .keys
            .get(key)
            .copied()
            .ok_or_else(|| StoreError::NotFound(format!("embedding {}", key)))?;

        let fields = MetadataFields::extract(&metadata);
        if let Some(record) = state.records.get_mut(&id) {
            record.metadata = metadata;
            record.updated_at = Utc::now();
        }
        state.write_metadata(id, fields);
        Ok(())
    }

    async fn delete(
        &self,
        content_id: &str,
        content_type: Option<&str>,
        model_name: Option<&str>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let ids = state.matching_ids(content_id, content_type, model_name);
        let mut removed = false;
        for id in ids {
            removed |= state.remove(id);
        }
        debug!("Deleted embeddings for {}: {}", content_id, removed);
        Ok(removed)
    }

    async fn delete_by_content_id(&self, content_id: &str) -> Result<u64> {
        let mut state = self.state.write().await;
        let ids = state.matching_ids(content_id, None, None);
        let mut count = 0;
        for id in ids {
            if state.remove(id) {
                count += 1;
            }
        }
        debug!("Deleted {} embeddings for {}", count, content_id);
        Ok(count)
    }

    async fn similarity_search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        query.validate()?;

        let state = self.state.read().await;
        let mut ranker = Ranker::new(query);
        for record in state.records.values() {
            let fields = state.metadata.get(&record.id);
            ranker.offer(Candidate {
                id: record.id,
                content_id: &record.content_id,
                content_type: &record.content_type,
                model_name: &record.model_name,
                vector: record.vector(),
                title: fields.and_then(|m| m.title.as_deref()),
                content_snippet: fields.and_then(|m| m.content_snippet.as_deref()),
                metadata: &record.metadata,
            });
        }
        drop(state);

        debug!("Scored {} candidates", ranker.scanned());
        Ok(ranker.finish())
    }

    async fn batch_store(&self, embeddings: Vec<NewEmbedding>) -> Result<Vec<i64>> {
        let prepared = prepare_batch(embeddings)?;

        let mut state = self.state.write().await;
        let ids = prepared
            .into_iter()
            .map(|embedding| state.upsert(embedding))
            .collect();
        Ok(ids)
    }

    async fn batch_delete(&self, ids: &[i64]) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut count = 0;
        for id in ids {
            if state.remove(*id) {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn stats(&self) -> Result<EmbeddingStats> {
        let state = self.state.read().await;

        let mut by_model = BTreeMap::new();
        let mut by_content_type = BTreeMap::new();
        let mut dimension_sum: u64 = 0;
        for record in state.records.values() {
            *by_model.entry(record.model_name.clone()).or_insert(0) += 1;
            *by_content_type
                .entry(record.content_type.clone())
                .or_insert(0) += 1;
            dimension_sum += record.embedding_dim() as u64;
        }

        let total_embeddings = state.records.len() as u64;
        let average_dimension = if total_embeddings == 0 {
            0.0
        } else {
            dimension_sum as f64 / total_embeddings as f64
        };

        Ok(EmbeddingStats {
            total_embeddings,
            by_model,
            by_content_type,
            average_dimension,
            estimated_storage_bytes: EmbeddingStats::estimate_storage_bytes(
                total_embeddings,
                average_dimension,
            ),
        })
    }
}
