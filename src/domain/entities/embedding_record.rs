use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chunk::{Modality, MultiVector};

/// Metadata blob persisted next to each embedded chunk, JSON-encoded in the
/// `chunk_metadata` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecordMetadata {
    /// Identifier of the model that produced the embedding.
    pub model: String,
    /// `[number_of_vectors, vector_width]` of the multi-vector.
    pub shape: [usize; 2],
    pub is_image: bool,
    pub timestamp: DateTime<Utc>,
}

impl EmbeddingRecordMetadata {
    pub fn new(model: &str, modality: Modality, vectors: &MultiVector) -> Self {
        let width = vectors.first().map(Vec::len).unwrap_or(0);
        Self {
            model: model.to_string(),
            shape: [vectors.len(), width],
            is_image: modality == Modality::Image,
            timestamp: Utc::now(),
        }
    }
}

/// One row of the `multi_vector_embeddings` table, identified by the
/// `(document_id, chunk_number)` composite key.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub document_id: String,
    pub chunk_number: i32,
    pub content: String,
    pub metadata: EmbeddingRecordMetadata,
    /// The multi-vector payload itself, stored in its own column.
    pub embedding: Option<MultiVector>,
}
