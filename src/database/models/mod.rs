
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::warn;

use crate::embeddings::similarity::SimilarityMetric;
use crate::{Result, StoreError};

/// Opaque key/value data carried alongside a vector.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Longest `content_snippet` kept on an [`EmbeddingMetadataRecord`], in characters.
pub const CONTENT_SNIPPET_MAX_CHARS: usize = 500;

const SNIPPET_SOURCE_KEYS: [&str; 4] = ["content_snippet", "content", "summary", "description"];

/// Convert any serializable value into [`Metadata`].
///
/// Fails with a validation error if the value cannot be serialized or does not
/// serialize to a JSON object.
#[inline]
pub fn metadata_from<T: Serialize + ?Sized>(value: &T) -> Result<Metadata> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::validation(format!(
            "Metadata must serialize to an object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(StoreError::validation(format!(
            "Metadata is not serializable: {}",
            e
        ))),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// The unique key of an embedding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmbeddingKey {
    pub content_id: String,
    pub content_type: String,
    pub model_name: String,
}

impl EmbeddingKey {
    #[inline]
    pub fn new(
        content_id: impl Into<String>,
        content_type: impl Into<String>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            content_type: content_type.into(),
            model_name: model_name.into(),
        }
    }
}

impl fmt::Display for EmbeddingKey {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.content_id, self.content_type, self.model_name
        )
    }
}

/// A stored vector and its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRecord {
    pub id: i64,
    pub content_id: String,
    pub content_type: String,
    pub model_name: String,
    vector: Vec<f32>,
    embedding_dim: usize,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub(crate) fn from_parts(
        id: i64,
        key: EmbeddingKey,
        vector: Vec<f32>,
        metadata: Metadata,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let embedding_dim = vector.len();
        Self {
            id,
            content_id: key.content_id,
            content_type: key.content_type,
            model_name: key.model_name,
            vector,
            embedding_dim,
            metadata,
            created_at,
            updated_at,
        }
    }

    #[inline]
    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    #[inline]
    pub fn into_vector(self) -> Vec<f32> {
        self.vector
    }

    /// Always equal to `self.vector().len()`.
    #[inline]
    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    #[inline]
    pub fn key(&self) -> EmbeddingKey {
        EmbeddingKey::new(&self.content_id, &self.content_type, &self.model_name)
    }

    #[inline]
    pub fn matches(
        &self,
        content_id: &str,
        content_type: Option<&str>,
        model_name: Option<&str>,
    ) -> bool {
        self.content_id == content_id
            && content_type.is_none_or(|ct| self.content_type == ct)
            && model_name.is_none_or(|m| self.model_name == m)
    }

    pub(crate) fn replace(&mut self, vector: Vec<f32>, metadata: Metadata, now: DateTime<Utc>) {
        self.embedding_dim = vector.len();
        self.vector = vector;
        self.metadata = metadata;
        self.updated_at = now;
    }
}

/// Searchable fields denormalized out of an embedding's metadata.
///
/// There is exactly one per [`EmbeddingRecord`]; it is rewritten on every
/// store and removed together with its embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingMetadataRecord {
    pub id: i64,
    pub embedding_id: i64,
    pub title: Option<String>,
    pub content_snippet: Option<String>,
    pub source: Option<String>,
    pub published_at: Option<String>,
    pub extra: Metadata,
}

/// The denormalized fields before they are attached to a stored embedding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFields {
    pub title: Option<String>,
    pub content_snippet: Option<String>,
    pub source: Option<String>,
    pub published_at: Option<String>,
    pub extra: Metadata,
}

impl MetadataFields {
    /// Split `metadata` into the well-known searchable fields and the remainder.
    #[inline]
    pub fn extract(metadata: &Metadata) -> Self {
        let mut extra = metadata.clone();

        let title = take_string(&mut extra, "title");
        let source = take_string(&mut extra, "source");
        let published_at = take_string(&mut extra, "published_at");

        let content_snippet = SNIPPET_SOURCE_KEYS
            .iter()
            .find_map(|key| metadata.get(*key).and_then(serde_json::Value::as_str))
            .map(|text| truncate_chars(text, CONTENT_SNIPPET_MAX_CHARS));
        take_string(&mut extra, "content_snippet");

        Self {
            title,
            content_snippet,
            source,
            published_at,
            extra,
        }
    }

    #[inline]
    pub fn into_record(self, id: i64, embedding_id: i64) -> EmbeddingMetadataRecord {
        EmbeddingMetadataRecord {
            id,
            embedding_id,
            title: self.title,
            content_snippet: self.content_snippet,
            source: self.source,
            published_at: self.published_at,
            extra: self.extra,
        }
    }
}

fn take_string(map: &mut Metadata, key: &str) -> Option<String> {
    if !matches!(map.get(key), Some(serde_json::Value::String(_))) {
        return None;
    }
    match map.remove(key) {
        Some(serde_json::Value::String(s)) => Some(s),
        _ => None,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Input to [`crate::database::VectorStore::store`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewEmbedding {
    pub content_id: String,
    pub content_type: String,
    pub model_name: String,
    pub vector: Vec<f32>,
    /// Dimension the caller expects; checked against `vector.len()` when set.
    pub embedding_dim: Option<usize>,
    pub metadata: Option<Metadata>,
}

impl NewEmbedding {
    #[inline]
    pub fn new(
        content_id: impl Into<String>,
        content_type: impl Into<String>,
        model_name: impl Into<String>,
        vector: Vec<f32>,
    ) -> Self {
        Self {
            content_id: content_id.into(),
            content_type: content_type.into(),
            model_name: model_name.into(),
            vector,
            embedding_dim: None,
            metadata: None,
        }
    }

    #[inline]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[inline]
    pub fn with_embedding_dim(mut self, embedding_dim: usize) -> Self {
        self.embedding_dim = Some(embedding_dim);
        self
    }

    #[inline]
    pub fn key(&self) -> EmbeddingKey {
        EmbeddingKey::new(&self.content_id, &self.content_type, &self.model_name)
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("content_id", &self.content_id),
            ("content_type", &self.content_type),
            ("model_name", &self.model_name),
        ] {
            if value.trim().is_empty() {
                return Err(StoreError::validation(format!("{} cannot be empty", field)));
            }
        }

        validate_vector(&self.vector)?;

        if let Some(declared) = self.embedding_dim {
            if declared != self.vector.len() {
                return Err(StoreError::validation(format!(
                    "Declared embedding_dim {} does not match vector length {}",
                    declared,
                    self.vector.len()
                )));
            }
        }

        Ok(())
    }
}

fn validate_vector(vector: &[f32]) -> Result<()> {
    if vector.is_empty() {
        return Err(StoreError::validation("Vector cannot be empty"));
    }
    if let Some(position) = vector.iter().position(|v| !v.is_finite()) {
        return Err(StoreError::validation(format!(
            "Vector component {} is not a finite number",
            position
        )));
    }
    Ok(())
}

/// Checks shared by every adapter's `batch_store`.
///
/// A key repeated within the batch fails the whole batch. Entries that fail
/// validation are logged and dropped.
pub(crate) fn prepare_batch(records: Vec<NewEmbedding>) -> Result<Vec<NewEmbedding>> {
    let mut seen = HashSet::with_capacity(records.len());
    for record in &records {
        let key = record.key();
        if !seen.insert(key) {
            return Err(StoreError::validation(format!(
                "Duplicate key within batch: {}",
                record.key()
            )));
        }
    }

    Ok(records
        .into_iter()
        .filter(|record| match record.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!("Skipping invalid embedding {}: {}", record.key(), e);
                false
            }
        })
        .collect())
}

/// Parameters of a brute-force similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub vector: Vec<f32>,
    pub model_name: Option<String>,
    pub content_type: Option<String>,
    pub metric: SimilarityMetric,
    pub top_k: usize,
    pub min_similarity: f32,
}

impl SearchQuery {
    #[inline]
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            model_name: None,
            content_type: None,
            metric: SimilarityMetric::Cosine,
            top_k: 10,
            min_similarity: 0.0,
        }
    }

    #[inline]
    pub fn model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = Some(model_name.into());
        self
    }

    #[inline]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    #[inline]
    pub fn metric(mut self, metric: SimilarityMetric) -> Self {
        self.metric = metric;
        self
    }

    #[inline]
    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[inline]
    pub fn min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        validate_vector(&self.vector)?;
        if self.top_k == 0 {
            return Err(StoreError::validation("top_k must be at least 1"));
        }
        if !self.min_similarity.is_finite() {
            return Err(StoreError::validation(
                "min_similarity must be a finite number",
            ));
        }
        Ok(())
    }
}

/// One ranked result of a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub content_id: String,
    pub content_type: String,
    pub model_name: String,
    pub score: f32,
    pub title: Option<String>,
    pub content_snippet: Option<String>,
    pub metadata: Metadata,
}

/// Aggregate counts over everything in a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingStats {
    pub total_embeddings: u64,
    pub by_model: BTreeMap<String, u64>,
    pub by_content_type: BTreeMap<String, u64>,
    pub average_dimension: f64,
    /// `total_embeddings * average_dimension * 4`, an estimate of vector payload only.
    pub estimated_storage_bytes: u64,
}

impl EmbeddingStats {
    #[inline]
    pub fn estimate_storage_bytes(total_embeddings: u64, average_dimension: f64) -> u64 {
        let bytes = total_embeddings as f64 * average_dimension * 4.0;
        if bytes.is_finite() && bytes > 0.0 {
            bytes.round() as u64
        } else {
            0
        }
    }
}
