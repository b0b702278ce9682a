use embedding_pipeline::configuration::get_configuration;
use embedding_pipeline::domain::entities::chunk::{Chunk, Modality};
use embedding_pipeline::domain::entities::embedding_record::{
    EmbeddingRecord, EmbeddingRecordMetadata,
};
use embedding_pipeline::repositories::embedding_postgres_repository::EmbeddingPostgresRepository;
use embedding_pipeline::startup::get_connection_pool;
use httpmock::prelude::*;
use serde_json::json;
use uuid::Uuid;

use crate::helpers::{spawn_pipeline_with_database, test_settings};

fn repository() -> EmbeddingPostgresRepository {
    let configuration = get_configuration().expect("Failed to read configuration");
    EmbeddingPostgresRepository::new(get_connection_pool(&configuration.database))
}

fn sample_record(document_id: &str, chunk_number: i32, content: &str) -> EmbeddingRecord {
    let vectors = vec![vec![0.5, 1.5], vec![2.5, 3.5]];
    EmbeddingRecord {
        document_id: document_id.to_string(),
        chunk_number,
        content: content.to_string(),
        metadata: EmbeddingRecordMetadata::new("colpali-v1.2", Modality::Text, &vectors),
        embedding: Some(vectors),
    }
}

// Needs a running Postgres instance, see configuration/local.yaml.
#[tokio::test]
#[ignore]
async fn upserting_the_same_chunk_twice_keeps_a_single_row() {
    // Arrange
    let repository = repository();
    repository
        .ensure_schema()
        .await
        .expect("Failed to create the schema");
    let document_id = Uuid::new_v4().to_string();

    // Act
    repository
        .upsert_chunk(&sample_record(&document_id, 0, "first version"))
        .await
        .expect("Failed to upsert the chunk");
    repository
        .upsert_chunk(&sample_record(&document_id, 0, "second version"))
        .await
        .expect("Failed to upsert the chunk again");

    // Assert: last write wins, no duplicate row.
    let count = repository
        .count_chunks(&document_id)
        .await
        .expect("Failed to count chunks");
    assert_eq!(count, 1);

    let stored = repository
        .fetch_chunk(&document_id, 0)
        .await
        .expect("Failed to fetch the chunk")
        .expect("No stored chunk found");
    assert_eq!(stored.content, "second version");
    assert_eq!(stored.embedding, Some(vec![vec![0.5, 1.5], vec![2.5, 3.5]]));
    assert_eq!(stored.metadata.shape, [2, 2]);
}

#[tokio::test]
#[ignore]
async fn distinct_chunk_numbers_of_one_document_are_separate_rows() {
    // Arrange
    let repository = repository();
    repository
        .ensure_schema()
        .await
        .expect("Failed to create the schema");
    let document_id = Uuid::new_v4().to_string();

    // Act
    for chunk_number in 0..3 {
        repository
            .upsert_chunk(&sample_record(&document_id, chunk_number, "content"))
            .await
            .expect("Failed to upsert the chunk");
    }

    // Assert
    let count = repository
        .count_chunks(&document_id)
        .await
        .expect("Failed to count chunks");
    assert_eq!(count, 3);
}

#[tokio::test]
#[ignore]
async fn ingested_batch_is_persisted_end_to_end() {
    // Arrange
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200)
                .json_body(json!({"embeddings": [[[1.5, 2.5]]]}));
        })
        .await;

    let configuration = get_configuration().expect("Failed to read configuration");
    let mut settings = test_settings(&server.base_url());
    settings.database = configuration.database;
    let pipeline = spawn_pipeline_with_database(settings);

    let document_id = Uuid::new_v4().to_string();
    let chunks = vec![Chunk::image("aW1hZ2U=")];

    // Act
    let outcome = pipeline.ingest_chunk_batch(&document_id, &chunks).await;

    // Assert
    assert!(outcome.persisted);

    let stored = repository()
        .fetch_chunk(&document_id, 0)
        .await
        .expect("Failed to fetch the chunk")
        .expect("No stored chunk found");
    assert_eq!(stored.content, "data:image/png;base64,aW1hZ2U=");
    assert!(stored.metadata.is_image);
    assert_eq!(stored.embedding, Some(vec![vec![1.5, 2.5]]));
}
