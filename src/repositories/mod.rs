pub mod embedding_postgres_repository;
