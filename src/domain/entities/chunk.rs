use serde::{Deserialize, Serialize};

/// A multi-vector: an ordered list of fixed-width embedding vectors for one chunk.
///
/// The vector width is backend-specific but constant within one response.
pub type MultiVector = Vec<Vec<f32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
        }
    }
}

/// One document chunk handed to the pipeline. Immutable for the lifetime of
/// an ingestion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// UTF-8 text, or a base64-encoded image (optionally wrapped in a
    /// `data:...;base64,` URI by the caller's presentation layer).
    pub content: String,
    pub modality: Modality,
    /// Caller-precomputed chunk number. Falls back to the batch index.
    #[serde(default)]
    pub chunk_id: Option<i32>,
}

impl Chunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            modality: Modality::Text,
            chunk_id: None,
        }
    }

    pub fn image(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            modality: Modality::Image,
            chunk_id: None,
        }
    }
}

/// Per-chunk embedding outcome.
///
/// `Pending` is the cold-start "no embedding yet" state: the backend accepted
/// the batch but is still warming up. It is distinct from `Failed`, which
/// means the chunk's modality sub-batch errored.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkEmbedding {
    Embedded(MultiVector),
    Pending,
    Failed,
}

impl ChunkEmbedding {
    pub fn vectors(&self) -> Option<&MultiVector> {
        match self {
            ChunkEmbedding::Embedded(vectors) => Some(vectors),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ChunkEmbedding::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ChunkEmbedding::Failed)
    }
}

/// Embedding outcome for one input chunk, tagged with its original position.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub chunk_index: usize,
    pub modality: Modality,
    pub embedding: ChunkEmbedding,
}
