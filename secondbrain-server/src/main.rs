use std::sync::Arc;

use clap::Parser;
use secondbrain_core::{
    create_backend, EmbeddingBackend, Environment, KnowledgeStore, LanguageModel,
    MemoryKnowledgeStore, OpenAiChatClient, PgKnowledgeStore, SecondBrainConfig,
};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use secondbrain_server::subsystems::weather::WeatherClient;
use secondbrain_server::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "secondbrain.toml")]
    config: String,

    /// Check database connectivity and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience: production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match SecondBrainConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over service.log_level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    tracing::info!(environment = ?config.environment, "Starting SecondBrain");

    let store: Arc<dyn KnowledgeStore> =
        if config.environment == Environment::Test && !args.health {
            tracing::warn!("Test environment: using in-memory knowledge store");
            Arc::new(MemoryKnowledgeStore::new(config.embedding.dimensions as usize))
        } else {
            let pool = match secondbrain_core::db::create_pool(&config.database).await {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("Failed to connect to database: {}", e);
                    std::process::exit(1);
                }
            };

            if args.health {
                match secondbrain_core::db::health_check(&pool).await {
                    Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                    Err(e) => {
                        println!("❌ PostgreSQL connection failed: {}", e);
                        std::process::exit(1);
                    }
                }

                match secondbrain_core::db::check_pgvector(&pool).await {
                    Ok(v) => println!("✅ pgvector version: {}", v),
                    Err(e) => {
                        println!("❌ pgvector check failed: {}", e);
                        std::process::exit(1);
                    }
                }

                println!("✅ SecondBrain DB health check passed");
                return Ok(());
            }

            if config.database.run_migrations {
                secondbrain_core::db::run_migrations(&pool).await?;
                tracing::info!("Database migrations applied");
            }

            let column = secondbrain_core::db::embedding_column_dimensions(&pool).await?;
            if column != config.embedding.dimensions as i32 {
                anyhow::bail!(
                    "embedding.dimensions is {} but embeddings.embedding is vector({})",
                    config.embedding.dimensions,
                    column
                );
            }

            Arc::new(PgKnowledgeStore::new(pool))
        };

    let model: Arc<dyn LanguageModel> = Arc::new(OpenAiChatClient::from_settings(&config.llm)?);
    let embedder: Arc<dyn EmbeddingBackend> = Arc::from(create_backend(&config.embedding)?);
    let weather = if config.weather.enabled {
        Some(WeatherClient::new(&config.weather)?)
    } else {
        None
    };

    tracing::info!(
        model = %config.llm.model,
        embedding = %config.embedding.backend,
        store = store.name(),
        weather = weather.is_some(),
        "Backends ready"
    );

    let state = AppState {
        config,
        model,
        embedder,
        store,
        weather,
    };

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    secondbrain_server::http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
