use anyhow::Context;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::VectorStore;
use super::models::{
    EmbeddingKey, EmbeddingMetadataRecord, EmbeddingRecord, EmbeddingStats, Metadata,
    NewEmbedding, SearchHit, SearchQuery, prepare_batch,
};
use crate::{Result, StoreError};


pub mod queries;

pub use queries::EmbeddingQueries;

pub type DbPool = Pool<Sqlite>;

const DATABASE_FILE_NAME: &str = "embeddings.db";

/// [`VectorStore`] persisted in a SQLite database.
///
/// Uniqueness of `(content_id, content_type, model_name)` is enforced by a
/// table constraint, and every operation holds a pooled connection only for
/// its own duration.
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    pool: DbPool,
}

impl SqliteVectorStore {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join(DATABASE_FILE_NAME)).await
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::storage("optimize", "VACUUM", e))?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::storage("optimize", "ANALYZE", e))?;

        debug!("Database optimization completed");
        Ok(())
    }

    async fn acquire(&self, operation: &'static str, key: &str) -> Result<PoolConnection<Sqlite>> {
        self.pool
            .acquire()
            .await
            .map_err(|e| StoreError::storage(operation, key, e))
    }
}

fn partial_key(content_id: &str, content_type: Option<&str>, model_name: Option<&str>) -> String {
    format!(
        "{}/{}/{}",
        content_id,
        content_type.unwrap_or("*"),
        model_name.unwrap_or("*")
    )
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn store(&self, embedding: NewEmbedding) -> Result<i64> {
        embedding.validate()?;
        let key = embedding.key().to_string();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::storage("store", &key, e))?;
        let id = EmbeddingQueries::upsert(&mut tx, &embedding)
            .await
            .map_err(|e| StoreError::storage("store", &key, e))?;
        tx.commit()
            .await
            .map_err(|e| StoreError::storage("store", &key, e))?;

        Ok(id)
    }

    async fn get(
        &self,
        content_id: &str,
        content_type: Option<&str>,
        model_name: Option<&str>,
    ) -> Result<Option<EmbeddingRecord>> {
        let key = partial_key(content_id, content_type, model_name);
        let mut conn = self.acquire("get", &key).await?;

        EmbeddingQueries::find(&mut conn, content_id, content_type, model_name)
            .await
            .map_err(|e| StoreError::storage("get", key, e))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<EmbeddingRecord>> {
        let key = format!("id {}", id);
        let mut conn = self.acquire("get_by_id", &key).await?;

        EmbeddingQueries::get_by_id(&mut conn, id)
            .await
            .map_err(|e| StoreError::storage("get_by_id", key, e))
    }

    async fn get_metadata(&self, embedding_id: i64) -> Result<Option<EmbeddingMetadataRecord>> {
        let key = format!("embedding id {}", embedding_id);
        let mut conn = self.acquire("get_metadata", &key).await?;

        EmbeddingQueries::get_metadata(&mut conn, embedding_id)
            .await
            .map_err(|e| StoreError::storage("get_metadata", key, e))
    }

    async fn update_metadata(&self, key: &EmbeddingKey, metadata: Metadata) -> Result<()> {
        let key_text = key.to_string();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::storage("update_metadata", &key_text, e))?;
        let updated = EmbeddingQueries::update_metadata(&mut tx, key, &metadata)
            .await
            .map_err(|e| StoreError::storage("update_metadata", &key_text, e))?;

        if updated.is_none() {
            return Err(StoreError::NotFound(format!("embedding {}", key_text)));
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::storage("update_metadata", &key_text, e))?;
        Ok(())
    }

    async fn delete(
        &self,
        content_id: &str,
        content_type: Option<&str>,
        model_name: Option<&str>,
    ) -> Result<bool> {
        let key = partial_key(content_id, content_type, model_name);
        let mut conn = self.acquire("delete", &key).await?;

        let removed =
            EmbeddingQueries::delete_matching(&mut conn, content_id, content_type, model_name)
                .await
                .map_err(|e| StoreError::storage("delete", &key, e))?;

        debug!("Deleted {} embeddings matching {}", removed, key);
        Ok(removed > 0)
    }

    async fn delete_by_content_id(&self, content_id: &str) -> Result<u64> {
        let mut conn = self.acquire("delete_by_content_id", content_id).await?;

        let removed = EmbeddingQueries::delete_matching(&mut conn, content_id, None, None)
            .await
            .map_err(|e| StoreError::storage("delete_by_content_id", content_id, e))?;

        debug!("Deleted {} embeddings for {}", removed, content_id);
        Ok(removed)
    }

    async fn similarity_search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        query.validate()?;

        let key = format!(
            "model={} type={} metric={}",
            query.model_name.as_deref().unwrap_or("*"),
            query.content_type.as_deref().unwrap_or("*"),
            query.metric
        );
        let mut conn = self.acquire("similarity_search", &key).await?;

        EmbeddingQueries::scan_similar(&mut conn, query)
            .await
            .map_err(|e| StoreError::storage("similarity_search", key, e))
    }

    async fn batch_store(&self, embeddings: Vec<NewEmbedding>) -> Result<Vec<i64>> {
        let prepared = prepare_batch(embeddings)?;
        if prepared.is_empty() {
            return Ok(Vec::new());
        }

        let batch_key = format!("{} embeddings", prepared.len());
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::storage("batch_store", &batch_key, e))?;

        let mut ids = Vec::with_capacity(prepared.len());
        for embedding in &prepared {
            let id = EmbeddingQueries::upsert(&mut tx, embedding)
                .await
                .map_err(|e| StoreError::storage("batch_store", embedding.key().to_string(), e))?;
            ids.push(id);
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::storage("batch_store", &batch_key, e))?;

        info!("Stored batch of {} embeddings", ids.len());
        Ok(ids)
    }

    async fn batch_delete(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let batch_key = format!("{} ids", ids.len());
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::storage("batch_delete", &batch_key, e))?;

        let mut removed = 0;
        for id in ids {
            if EmbeddingQueries::delete_by_id(&mut tx, *id)
                .await
                .map_err(|e| StoreError::storage("batch_delete", format!("id {}", id), e))?
            {
                removed += 1;
            }
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::storage("batch_delete", &batch_key, e))?;

        debug!("Deleted {} of {} requested embeddings", removed, ids.len());
        Ok(removed)
    }

    async fn stats(&self) -> Result<EmbeddingStats> {
        let mut conn = self.acquire("stats", "*").await?;

        EmbeddingQueries::stats(&mut conn)
            .await
            .map_err(|e| StoreError::storage("stats", "*", e))
    }
}
