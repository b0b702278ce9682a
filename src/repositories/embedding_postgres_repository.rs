use sqlx::{PgPool, Row};

use crate::domain::entities::embedding_record::{EmbeddingRecord, EmbeddingRecordMetadata};
use crate::helper::error_chain_fmt;

/// Repository for multi-vector embeddings persisted in Postgres, one row per
/// `(document_id, chunk_number)`.
pub struct EmbeddingPostgresRepository {
    pg_pool: PgPool,
}

impl EmbeddingPostgresRepository {
    pub fn new(pg_pool: PgPool) -> Self {
        Self { pg_pool }
    }

    /// Creates the embeddings table and its composite unique key if absent.
    /// Idempotent, safe to run on every startup.
    #[tracing::instrument(name = "Ensuring multi vector embeddings schema", skip(self))]
    pub async fn ensure_schema(&self) -> Result<(), EmbeddingPostgresRepositoryError> {
        sqlx::query(
            r#"
    CREATE TABLE IF NOT EXISTS multi_vector_embeddings (
        document_id VARCHAR(255) NOT NULL,
        chunk_number INTEGER NOT NULL,
        content TEXT NOT NULL,
        chunk_metadata TEXT,
        embedding JSONB,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE (document_id, chunk_number)
    )
            "#,
        )
        .execute(&self.pg_pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_multi_vector_embeddings_document_id
             ON multi_vector_embeddings(document_id)",
        )
        .execute(&self.pg_pool)
        .await?;

        Ok(())
    }

    /// Insert-or-update keyed by `(document_id, chunk_number)`.
    ///
    /// On conflict the existing row's content, metadata and embedding are
    /// replaced by the new values: last-write-wins, so re-ingesting the same
    /// chunk (e.g. a retry after a transient backend failure) never produces
    /// a duplicate row.
    #[tracing::instrument(
        name = "Upserting embedded chunk",
        skip(self, record),
        fields(document_id = %record.document_id, chunk_number = record.chunk_number)
    )]
    pub async fn upsert_chunk(
        &self,
        record: &EmbeddingRecord,
    ) -> Result<(), EmbeddingPostgresRepositoryError> {
        let metadata_json = serde_json::to_string(&record.metadata)?;
        let embedding_json = record
            .embedding
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
    INSERT INTO multi_vector_embeddings (document_id, chunk_number, content, chunk_metadata, embedding)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (document_id, chunk_number)
    DO UPDATE SET
        content = EXCLUDED.content,
        chunk_metadata = EXCLUDED.chunk_metadata,
        embedding = EXCLUDED.embedding
            "#,
        )
        .bind(&record.document_id)
        .bind(record.chunk_number)
        .bind(&record.content)
        .bind(metadata_json)
        .bind(embedding_json)
        .execute(&self.pg_pool)
        .await?;

        Ok(())
    }

    /// Fetches one stored row by its composite identity.
    #[tracing::instrument(name = "Fetching embedded chunk", skip(self))]
    pub async fn fetch_chunk(
        &self,
        document_id: &str,
        chunk_number: i32,
    ) -> Result<Option<EmbeddingRecord>, EmbeddingPostgresRepositoryError> {
        let row = sqlx::query(
            "SELECT document_id, chunk_number, content, chunk_metadata, embedding
             FROM multi_vector_embeddings
             WHERE document_id = $1 AND chunk_number = $2",
        )
        .bind(document_id)
        .bind(chunk_number)
        .fetch_optional(&self.pg_pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let metadata_json: Option<String> = row.get("chunk_metadata");
        let metadata: EmbeddingRecordMetadata = serde_json::from_str(
            metadata_json.as_deref().unwrap_or("{}"),
        )?;
        let embedding_json: Option<serde_json::Value> = row.get("embedding");
        let embedding = embedding_json.map(serde_json::from_value).transpose()?;

        Ok(Some(EmbeddingRecord {
            document_id: row.get("document_id"),
            chunk_number: row.get("chunk_number"),
            content: row.get("content"),
            metadata,
            embedding,
        }))
    }

    /// Number of stored rows for one document.
    pub async fn count_chunks(
        &self,
        document_id: &str,
    ) -> Result<i64, EmbeddingPostgresRepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM multi_vector_embeddings WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_one(&self.pg_pool)
        .await?;

        Ok(count)
    }
}

#[derive(thiserror::Error)]
pub enum EmbeddingPostgresRepositoryError {
    #[error(transparent)]
    DBError(#[from] sqlx::Error),
    #[error("Failed to encode record payload: {0}")]
    EncodingError(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl std::fmt::Debug for EmbeddingPostgresRepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
