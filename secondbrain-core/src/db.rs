use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Width of `embeddings.embedding` as created by the migrations.
pub const EMBEDDING_COLUMN_DIMENSIONS: usize = 1536;

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
}

/// Apply the embedded migrations (`resources`, `embeddings`, HNSW index).
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

pub async fn check_pgvector(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) =
        sqlx::query_as("SELECT extversion FROM pg_extension WHERE extname = 'vector'")
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

/// Declared width of `embeddings.embedding`; pgvector stores it as the typmod.
pub async fn embedding_column_dimensions(pool: &PgPool) -> Result<i32, sqlx::Error> {
    let row: (i32,) = sqlx::query_as(
        r#"
        SELECT atttypmod FROM pg_attribute
        WHERE attrelid = 'embeddings'::regclass AND attname = 'embedding'
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}
