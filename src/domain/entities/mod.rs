pub mod chunk;
pub mod embedding_record;
