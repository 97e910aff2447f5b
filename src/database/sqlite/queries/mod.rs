
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::{FromRow, SqliteConnection};
use std::collections::BTreeMap;
use tracing::debug;

use crate::database::models::{
    EmbeddingKey, EmbeddingMetadataRecord, EmbeddingRecord, EmbeddingStats, Metadata,
    MetadataFields, NewEmbedding, SearchHit, SearchQuery,
};
use crate::database::search::{Candidate, Ranker};

pub type QueryResult<T> = std::result::Result<T, sqlx::Error>;

const EMBEDDING_COLUMNS: &str = "id, content_id, content_type, model_name, vector, embedding_dim, metadata, created_at, updated_at";

#[derive(Debug, FromRow)]
struct EmbeddingRow {
    id: i64,
    content_id: String,
    content_type: String,
    model_name: String,
    vector: Vec<u8>,
    embedding_dim: i64,
    metadata: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EmbeddingRow> for EmbeddingRecord {
    type Error = sqlx::Error;

    fn try_from(row: EmbeddingRow) -> QueryResult<Self> {
        let vector = decode_vector(&row.vector)?;
        if i64::try_from(vector.len()).ok() != Some(row.embedding_dim) {
            return Err(corrupt(format!(
                "embedding {} has dimension {} but {} stored components",
                row.id,
                row.embedding_dim,
                vector.len()
            )));
        }
        let metadata = decode_metadata(&row.metadata)?;

        Ok(EmbeddingRecord::from_parts(
            row.id,
            EmbeddingKey {
                content_id: row.content_id,
                content_type: row.content_type,
                model_name: row.model_name,
            },
            vector,
            metadata,
            row.created_at,
            row.updated_at,
        ))
    }
}

#[derive(Debug, FromRow)]
struct MetadataRow {
    id: i64,
    embedding_id: i64,
    title: Option<String>,
    content_snippet: Option<String>,
    source: Option<String>,
    published_at: Option<String>,
    extra: String,
}

impl TryFrom<MetadataRow> for EmbeddingMetadataRecord {
    type Error = sqlx::Error;

    fn try_from(row: MetadataRow) -> QueryResult<Self> {
        Ok(EmbeddingMetadataRecord {
            id: row.id,
            embedding_id: row.embedding_id,
            title: row.title,
            content_snippet: row.content_snippet,
            source: row.source,
            published_at: row.published_at,
            extra: decode_metadata(&row.extra)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct CandidateRow {
    id: i64,
    content_id: String,
    content_type: String,
    model_name: String,
    vector: Vec<u8>,
    metadata: String,
    title: Option<String>,
    content_snippet: Option<String>,
}

/// Little-endian `f32` components, four bytes each.
#[inline]
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[inline]
pub fn decode_vector(bytes: &[u8]) -> QueryResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(corrupt(format!(
            "vector blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| {
            let mut raw = [0_u8; 4];
            raw.copy_from_slice(chunk);
            f32::from_le_bytes(raw)
        })
        .collect())
}

fn encode_metadata(metadata: &Metadata) -> QueryResult<String> {
    serde_json::to_string(metadata).map_err(|e| sqlx::Error::Encode(Box::new(e)))
}

fn decode_metadata(text: &str) -> QueryResult<Metadata> {
    serde_json::from_str(text).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn corrupt(message: String) -> sqlx::Error {
    sqlx::Error::Decode(message.into())
}

pub struct EmbeddingQueries;

impl EmbeddingQueries {
    /// Insert or update by key, then rewrite the metadata row. Returns the id.
    ///
    /// Run inside a transaction so both rows change together.
    #[inline]
    pub async fn upsert(conn: &mut SqliteConnection, embedding: &NewEmbedding) -> QueryResult<i64> {
        let now = Utc::now();
        let metadata = embedding.metadata.clone().unwrap_or_default();
        let metadata_json = encode_metadata(&metadata)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO embeddings
                (content_id, content_type, model_name, vector, embedding_dim, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(content_id, content_type, model_name) DO UPDATE SET
                vector = excluded.vector,
                embedding_dim = excluded.embedding_dim,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&embedding.content_id)
        .bind(&embedding.content_type)
        .bind(&embedding.model_name)
        .bind(encode_vector(&embedding.vector))
        .bind(embedding.vector.len() as i64)
        .bind(&metadata_json)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        Self::write_metadata(conn, id, &metadata).await?;

        debug!("Upserted embedding {} as id {}", embedding.key(), id);
        Ok(id)
    }

    async fn write_metadata(
        conn: &mut SqliteConnection,
        embedding_id: i64,
        metadata: &Metadata,
    ) -> QueryResult<()> {
        let fields = MetadataFields::extract(metadata);
        let extra = encode_metadata(&fields.extra)?;

        sqlx::query(
            r#"
            INSERT INTO embedding_metadata
                (embedding_id, title, content_snippet, source, published_at, extra)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(embedding_id) DO UPDATE SET
                title = excluded.title,
                content_snippet = excluded.content_snippet,
                source = excluded.source,
                published_at = excluded.published_at,
                extra = excluded.extra
            "#,
        )
        .bind(embedding_id)
        .bind(&fields.title)
        .bind(&fields.content_snippet)
        .bind(&fields.source)
        .bind(&fields.published_at)
        .bind(&extra)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Replace the metadata of `key`. Returns `None` if the key is not stored.
    #[inline]
    pub async fn update_metadata(
        conn: &mut SqliteConnection,
        key: &EmbeddingKey,
        metadata: &Metadata,
    ) -> QueryResult<Option<i64>> {
        let metadata_json = encode_metadata(metadata)?;

        let id: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE embeddings SET metadata = ?, updated_at = ?
            WHERE content_id = ? AND content_type = ? AND model_name = ?
            RETURNING id
            "#,
        )
        .bind(&metadata_json)
        .bind(Utc::now())
        .bind(&key.content_id)
        .bind(&key.content_type)
        .bind(&key.model_name)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(id) = id {
            Self::write_metadata(conn, id, metadata).await?;
        }
        Ok(id)
    }

    #[inline]
    pub async fn find(
        conn: &mut SqliteConnection,
        content_id: &str,
        content_type: Option<&str>,
        model_name: Option<&str>,
    ) -> QueryResult<Option<EmbeddingRecord>> {
        let sql = format!(
            r#"
            SELECT {EMBEDDING_COLUMNS} FROM embeddings
            WHERE content_id = ?
              AND (? IS NULL OR content_type = ?)
              AND (? IS NULL OR model_name = ?)
            ORDER BY id
            LIMIT 1
            "#
        );

        let row = sqlx::query_as::<_, EmbeddingRow>(&sql)
            .bind(content_id)
            .bind(content_type)
            .bind(content_type)
            .bind(model_name)
            .bind(model_name)
            .fetch_optional(&mut *conn)
            .await?;

        row.map(EmbeddingRecord::try_from).transpose()
    }

    #[inline]
    pub async fn get_by_id(
        conn: &mut SqliteConnection,
        id: i64,
    ) -> QueryResult<Option<EmbeddingRecord>> {
        let sql = format!("SELECT {EMBEDDING_COLUMNS} FROM embeddings WHERE id = ?");

        let row = sqlx::query_as::<_, EmbeddingRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        row.map(EmbeddingRecord::try_from).transpose()
    }

    #[inline]
    pub async fn get_metadata(
        conn: &mut SqliteConnection,
        embedding_id: i64,
    ) -> QueryResult<Option<EmbeddingMetadataRecord>> {
        let row = sqlx::query_as::<_, MetadataRow>(
            r#"
            SELECT id, embedding_id, title, content_snippet, source, published_at, extra
            FROM embedding_metadata WHERE embedding_id = ?
            "#,
        )
        .bind(embedding_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(EmbeddingMetadataRecord::try_from).transpose()
    }

    /// Delete every record matching the partial key; metadata rows cascade.
    #[inline]
    pub async fn delete_matching(
        conn: &mut SqliteConnection,
        content_id: &str,
        content_type: Option<&str>,
        model_name: Option<&str>,
    ) -> QueryResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM embeddings
            WHERE content_id = ?
              AND (? IS NULL OR content_type = ?)
              AND (? IS NULL OR model_name = ?)
            "#,
        )
        .bind(content_id)
        .bind(content_type)
        .bind(content_type)
        .bind(model_name)
        .bind(model_name)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn delete_by_id(conn: &mut SqliteConnection, id: i64) -> QueryResult<bool> {
        let result = sqlx::query("DELETE FROM embeddings WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Stream the filtered candidates through a [`Ranker`].
    ///
    /// Rows are scored as they arrive so only qualifying hits are held in memory.
    #[inline]
    pub async fn scan_similar(
        conn: &mut SqliteConnection,
        query: &SearchQuery,
    ) -> QueryResult<Vec<SearchHit>> {
        let dimension = query.vector.len() as i64;
        let model_name = query.model_name.as_deref();
        let content_type = query.content_type.as_deref();

        let mut rows = sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT e.id, e.content_id, e.content_type, e.model_name, e.vector, e.metadata,
                   m.title, m.content_snippet
            FROM embeddings e
            LEFT JOIN embedding_metadata m ON m.embedding_id = e.id
            WHERE e.embedding_dim = ?
              AND (? IS NULL OR e.model_name = ?)
              AND (? IS NULL OR e.content_type = ?)
            "#,
        )
        .bind(dimension)
        .bind(model_name)
        .bind(model_name)
        .bind(content_type)
        .bind(content_type)
        .fetch(&mut *conn);

        let mut ranker = Ranker::new(query);
        while let Some(row) = rows.try_next().await? {
            let vector = decode_vector(&row.vector)?;
            let metadata = decode_metadata(&row.metadata)?;
            ranker.offer(Candidate {
                id: row.id,
                content_id: &row.content_id,
                content_type: &row.content_type,
                model_name: &row.model_name,
                vector: &vector,
                title: row.title.as_deref(),
                content_snippet: row.content_snippet.as_deref(),
                metadata: &metadata,
            });
        }

        debug!("Scored {} candidates", ranker.scanned());
        Ok(ranker.finish())
    }

    #[inline]
    pub async fn stats(conn: &mut SqliteConnection) -> QueryResult<EmbeddingStats> {
        let (total, average): (i64, Option<f64>) =
            sqlx::query_as("SELECT COUNT(*), AVG(embedding_dim) FROM embeddings")
                .fetch_one(&mut *conn)
                .await?;

        let by_model = Self::count_grouped(conn, "model_name").await?;
        let by_content_type = Self::count_grouped(conn, "content_type").await?;

        let total_embeddings = u64::try_from(total).unwrap_or_default();
        let average_dimension = average.unwrap_or(0.0);

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

    async fn count_grouped(
        conn: &mut SqliteConnection,
        column: &'static str,
    ) -> QueryResult<BTreeMap<String, u64>> {
        let sql = format!("SELECT {column}, COUNT(*) FROM embeddings GROUP BY {column}");
        let rows: Vec<(String, i64)> = sqlx::query_as(&sql).fetch_all(&mut *conn).await?;

        Ok(rows
            .into_iter()
            .map(|(name, count)| (name, u64::try_from(count).unwrap_or_default()))
            .collect())
    }
}
