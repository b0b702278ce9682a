use futures::future;
use tracing::{error, warn};

use crate::domain::entities::chunk::{Chunk, ChunkEmbedding, EmbeddingResult, Modality, MultiVector};
use crate::domain::services::embedding_api::{
    BackendResponse, EmbeddingApiError, EmbeddingApiService,
};
use crate::domain::services::partition::partition_chunks;

/// A modality sub-batch whose backend call failed. The other modality's
/// results are unaffected.
#[derive(Debug)]
pub struct ModalityFailure {
    pub modality: Modality,
    pub error: EmbeddingApiError,
}

/// Outcome of embedding one chunk batch: always one result per input chunk,
/// in input order, plus any per-modality failures.
#[derive(Debug)]
pub struct BatchEmbedding {
    pub results: Vec<EmbeddingResult>,
    pub failures: Vec<ModalityFailure>,
}

impl BatchEmbedding {
    fn empty() -> Self {
        Self {
            results: vec![],
            failures: vec![],
        }
    }
}

/// Orchestrates per-modality backend calls for a heterogeneous chunk batch
/// and merges the responses back into original chunk order.
pub struct BatchEmbedder {
    api: EmbeddingApiService,
}

impl BatchEmbedder {
    pub fn new(api: EmbeddingApiService) -> Self {
        Self { api }
    }

    /// Embeds a batch of chunks, one backend call per non-empty modality
    /// sub-batch. The two calls are independent and run concurrently; the
    /// final result sequence is always in original chunk order regardless of
    /// which call completes first.
    #[tracing::instrument(
        name = "Embedding chunk batch",
        skip(self, chunks),
        fields(nb_chunks = chunks.len())
    )]
    pub async fn embed_batch(&self, chunks: &[Chunk]) -> BatchEmbedding {
        if chunks.is_empty() {
            return BatchEmbedding::empty();
        }

        let (text_inputs, image_inputs) = partition_chunks(chunks);

        // Every chunk starts out Pending and is overwritten by its modality's
        // outcome below.
        let mut results: Vec<EmbeddingResult> = chunks
            .iter()
            .enumerate()
            .map(|(chunk_index, chunk)| EmbeddingResult {
                chunk_index,
                modality: chunk.modality,
                embedding: ChunkEmbedding::Pending,
            })
            .collect();
        let mut failures = Vec::new();

        let (text_outcome, image_outcome) = future::join(
            self.embed_sub_batch(&text_inputs, Modality::Text),
            self.embed_sub_batch(&image_inputs, Modality::Image),
        )
        .await;

        apply_sub_batch_outcome(
            &mut results,
            &mut failures,
            &text_inputs,
            text_outcome,
            Modality::Text,
        );
        apply_sub_batch_outcome(
            &mut results,
            &mut failures,
            &image_inputs,
            image_outcome,
            Modality::Image,
        );

        BatchEmbedding { results, failures }
    }

    /// Embeds a single text input. Errors when the backend returns nothing,
    /// including when it is still cold starting.
    #[tracing::instrument(name = "Embedding query", skip(self, text))]
    pub async fn embed_query(&self, text: &str) -> Result<MultiVector, EmbeddingApiError> {
        let response = self.api.embed(&[text.to_string()], Modality::Text).await?;

        match response {
            BackendResponse::Embeddings(mut embeddings) if !embeddings.is_empty() => {
                Ok(embeddings.remove(0))
            }
            BackendResponse::Embeddings(_) | BackendResponse::Busy => Err(EmbeddingApiError::Empty),
        }
    }

    /// An empty sub-batch makes no backend call at all.
    async fn embed_sub_batch(
        &self,
        inputs: &[(usize, String)],
        modality: Modality,
    ) -> Option<Result<BackendResponse, EmbeddingApiError>> {
        if inputs.is_empty() {
            return None;
        }

        let contents: Vec<String> = inputs.iter().map(|(_, content)| content.clone()).collect();
        Some(self.api.embed(&contents, modality).await)
    }
}

/// Writes one sub-batch's backend outcome back into the full-batch result
/// vector, using the indices preserved by the partitioner.
fn apply_sub_batch_outcome(
    results: &mut [EmbeddingResult],
    failures: &mut Vec<ModalityFailure>,
    sub_batch: &[(usize, String)],
    outcome: Option<Result<BackendResponse, EmbeddingApiError>>,
    modality: Modality,
) {
    let Some(outcome) = outcome else {
        return;
    };

    match outcome {
        Ok(BackendResponse::Embeddings(embeddings)) => {
            if embeddings.len() != sub_batch.len() {
                let error = EmbeddingApiError::Decode(format!(
                    "expected {} embeddings, backend returned {}",
                    sub_batch.len(),
                    embeddings.len()
                ));
                mark_failed(results, failures, sub_batch, error, modality);
                return;
            }

            for ((chunk_index, _), vectors) in sub_batch.iter().zip(embeddings) {
                results[*chunk_index].embedding = ChunkEmbedding::Embedded(vectors);
            }
        }
        // Cold start: the affected chunks stay Pending, which callers must
        // distinguish from Failed.
        Ok(BackendResponse::Busy) => {
            warn!(
                modality = modality.as_str(),
                nb_chunks = sub_batch.len(),
                "Backend busy, returning empty embeddings for sub-batch"
            );
        }
        Err(error) => {
            mark_failed(results, failures, sub_batch, error, modality);
        }
    }
}

fn mark_failed(
    results: &mut [EmbeddingResult],
    failures: &mut Vec<ModalityFailure>,
    sub_batch: &[(usize, String)],
    error: EmbeddingApiError,
    modality: Modality,
) {
    error!(
        ?error,
        modality = modality.as_str(),
        nb_chunks = sub_batch.len(),
        "Failed to embed modality sub-batch"
    );
    for (chunk_index, _) in sub_batch {
        results[*chunk_index].embedding = ChunkEmbedding::Failed;
    }
    failures.push(ModalityFailure { modality, error });
}
