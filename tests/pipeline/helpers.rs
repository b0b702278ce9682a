use embedding_pipeline::configuration::{BackendSettings, DatabaseSettings, Settings};
use embedding_pipeline::startup::EmbeddingPipeline;
use embedding_pipeline::telemetry::{get_tracing_subscriber, init_tracing_subscriber};
use once_cell::sync::Lazy;
use secrecy::Secret;

// Ensures that the `tracing` stack is only initialised once.
// Traces are discarded unless TEST_LOG is set.
static TRACING: Lazy<()> = Lazy::new(|| {
    let app_name = "embedding_pipeline_test".to_string();
    let fallback_filter = "info".to_string();

    if std::env::var("TEST_LOG").is_ok() {
        let subscriber = get_tracing_subscriber(app_name, fallback_filter, std::io::stdout);
        init_tracing_subscriber(subscriber);
    } else {
        let subscriber = get_tracing_subscriber(app_name, fallback_filter, std::io::sink);
        init_tracing_subscriber(subscriber);
    }
});

/// Builds a pipeline pointed at a mock backend, with a database nobody
/// listens on: persistence attempts fail fast, embedding is unaffected.
pub fn spawn_pipeline(api_domain: &str) -> EmbeddingPipeline {
    Lazy::force(&TRACING);

    EmbeddingPipeline::build(test_settings(api_domain)).expect("Failed to build the pipeline")
}

/// Same as [`spawn_pipeline`] but keeps the database settings the caller
/// provides, for tests that persist against a real Postgres instance.
pub fn spawn_pipeline_with_database(settings: Settings) -> EmbeddingPipeline {
    Lazy::force(&TRACING);

    EmbeddingPipeline::build(settings).expect("Failed to build the pipeline")
}

pub fn test_settings(api_domain: &str) -> Settings {
    Settings {
        backend: BackendSettings {
            api_domain: api_domain.to_string(),
            api_key: Some(Secret::new("test-api-key".to_string())),
            model_name: "colpali-v1.2".to_string(),
            batch_size: 8,
            request_timeout_secs: 10,
        },
        database: unreachable_database(),
    }
}

/// Port 1 is never a Postgres server: every acquire fails.
pub fn unreachable_database() -> DatabaseSettings {
    DatabaseSettings {
        username: "postgres".to_string(),
        password: Secret::new("password".to_string()),
        port: 1,
        host: "127.0.0.1".to_string(),
        database_name: "embeddings_test".to_string(),
        require_ssl: false,
    }
}
