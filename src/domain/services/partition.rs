use crate::domain::entities::chunk::{Chunk, Modality};

/// Splits an ordered chunk batch into modality-homogeneous sub-batches.
///
/// Returns `(text_inputs, image_inputs)`, each entry paired with the chunk's
/// original batch index. The split is total and order-preserving: no chunk is
/// dropped or duplicated.
///
/// Image content is stripped of a `data:...;base64,` URI prefix: that wrapper
/// is a presentation-layer artifact, the backend expects the bare payload.
pub fn partition_chunks(chunks: &[Chunk]) -> (Vec<(usize, String)>, Vec<(usize, String)>) {
    let mut text_inputs = Vec::new();
    let mut image_inputs = Vec::new();

    for (index, chunk) in chunks.iter().enumerate() {
        match chunk.modality {
            Modality::Text => text_inputs.push((index, chunk.content.clone())),
            Modality::Image => {
                image_inputs.push((index, strip_data_uri(&chunk.content).to_string()))
            }
        }
    }

    (text_inputs, image_inputs)
}

/// Drops a structured-data URI prefix (`data:<mime>;base64,`) if present.
pub fn strip_data_uri(content: &str) -> &str {
    if content.starts_with("data:") {
        match content.split_once(',') {
            Some((_, payload)) => payload,
            None => content,
        }
    } else {
        content
    }
}
