use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{error, info};

use crate::configuration::{DatabaseSettings, Settings};
use crate::domain::entities::chunk::{Chunk, ChunkEmbedding, EmbeddingResult, Modality, MultiVector};
use crate::domain::entities::embedding_record::{EmbeddingRecord, EmbeddingRecordMetadata};
use crate::domain::services::batch_embedder::{BatchEmbedder, ModalityFailure};
use crate::domain::services::embedding_api::{
    BackendConfigurationError, EmbeddingApiError, EmbeddingApiService,
};
use crate::helper::error_chain_fmt;
use crate::repositories::embedding_postgres_repository::EmbeddingPostgresRepository;

/// Outcome of one ingestion call: per-chunk embeddings in input order, any
/// per-modality backend failures, and whether the best-effort persistence
/// side-channel was attempted and fully succeeded.
#[derive(Debug)]
pub struct IngestionOutcome {
    pub results: Vec<EmbeddingResult>,
    pub failures: Vec<ModalityFailure>,
    pub persisted: bool,
}

/// Top-level ingestion pipeline: partitions a chunk batch by modality,
/// embeds each sub-batch against the configured backend, and best-effort
/// persists the embedded chunks.
///
/// Built once from deployment configuration; immutable afterwards.
pub struct EmbeddingPipeline {
    batch_embedder: BatchEmbedder,
    embedding_repository: EmbeddingPostgresRepository,
    model_name: String,
}

impl EmbeddingPipeline {
    /// Wires the pipeline from settings. Credential validation happens here:
    /// a configuration mistake is the only error that can fail the whole
    /// pipeline, and it surfaces before any backend or database call.
    #[tracing::instrument(name = "Building embedding pipeline", skip(settings))]
    pub fn build(settings: Settings) -> Result<Self, EmbeddingPipelineError> {
        let api = EmbeddingApiService::try_new(&settings.backend)?;
        info!(variant = ?api.variant(), "Resolved embedding backend");

        let pg_pool = get_connection_pool(&settings.database);

        Ok(Self {
            batch_embedder: BatchEmbedder::new(api),
            embedding_repository: EmbeddingPostgresRepository::new(pg_pool),
            model_name: settings.backend.model_name,
        })
    }

    /// Embeds an ordered chunk batch and persists the embedded chunks.
    ///
    /// The returned results are always in input order. Persistence runs after
    /// embedding, never blocks the embeddings already computed, and its
    /// failure is reported only through the `persisted` flag: embedding
    /// computation is expensive and is not discarded because storage is
    /// temporarily unavailable.
    #[tracing::instrument(
        name = "Ingesting chunk batch",
        skip(self, chunks),
        fields(document_id = %document_id, nb_chunks = chunks.len())
    )]
    pub async fn ingest_chunk_batch(
        &self,
        document_id: &str,
        chunks: &[Chunk],
    ) -> IngestionOutcome {
        let batch = self.batch_embedder.embed_batch(chunks).await;

        let persisted = self
            .persist_embedded_chunks(document_id, chunks, &batch.results)
            .await;

        IngestionOutcome {
            results: batch.results,
            failures: batch.failures,
            persisted,
        }
    }

    /// Embeds a single text query. Not persisted.
    pub async fn embed_query(&self, text: &str) -> Result<MultiVector, EmbeddingApiError> {
        self.batch_embedder.embed_query(text).await
    }

    /// Upserts every embedded chunk, one row per `(document_id, chunk_number)`.
    ///
    /// Partial success is acceptable: each failed upsert is logged and the
    /// remaining chunks are still attempted, nothing is rolled back. Returns
    /// true only when at least one chunk was attempted and all succeeded.
    async fn persist_embedded_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        results: &[EmbeddingResult],
    ) -> bool {
        let records: Vec<EmbeddingRecord> = results
            .iter()
            .filter_map(|result| {
                let vectors = result.embedding.vectors()?;
                let chunk = &chunks[result.chunk_index];
                Some(EmbeddingRecord {
                    document_id: document_id.to_string(),
                    chunk_number: chunk.chunk_id.unwrap_or(result.chunk_index as i32),
                    content: stored_content(chunk),
                    metadata: EmbeddingRecordMetadata::new(
                        &self.model_name,
                        result.modality,
                        vectors,
                    ),
                    embedding: Some(vectors.clone()),
                })
            })
            .collect();

        if records.is_empty() {
            return false;
        }

        if let Err(error) = self.embedding_repository.ensure_schema().await {
            error!(?error, "Failed to ensure the embeddings schema, skipping persistence");
            return false;
        }

        let mut nb_persisted = 0;
        for record in &records {
            match self.embedding_repository.upsert_chunk(record).await {
                Ok(()) => nb_persisted += 1,
                Err(error) => {
                    error!(
                        ?error,
                        chunk_number = record.chunk_number,
                        "Failed to persist embedded chunk"
                    );
                }
            }
        }

        info!(
            nb_persisted,
            nb_embedded = records.len(),
            "Persisted embedded chunks"
        );
        nb_persisted == records.len()
    }
}

/// The stored content keeps the presentation-layer form: bare base64 image
/// payloads are re-wrapped as a data URI.
fn stored_content(chunk: &Chunk) -> String {
    match chunk.modality {
        Modality::Image if !chunk.content.starts_with("data:") => {
            format!("data:image/png;base64,{}", chunk.content)
        }
        _ => chunk.content.clone(),
    }
}

/// Lazy pool: no connection is attempted until the first persistence call,
/// so a pipeline can embed even while the database is down.
pub fn get_connection_pool(settings: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(Duration::from_secs(2))
        .connect_lazy_with(settings.with_db())
}

#[derive(thiserror::Error)]
pub enum EmbeddingPipelineError {
    #[error(transparent)]
    BackendConfigurationError(#[from] BackendConfigurationError),
}

impl std::fmt::Debug for EmbeddingPipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
