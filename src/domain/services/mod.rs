pub mod batch_embedder;
pub mod embedding_api;
pub mod partition;
