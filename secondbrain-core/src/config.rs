use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SecondBrainConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
            run_migrations: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// `openai` or `hashing`
    pub backend: String,
    pub model: String,
    pub dimensions: u32,
    pub base_url: String,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: "openai".to_string(),
            model: "text-embedding-ada-002".to_string(),
            dimensions: 1536,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub base_url: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Rows must score strictly above this to be returned.
    pub similarity_threshold: f64,
    pub limit: u32,
    pub max_similar_questions: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.3,
            limit: 4,
            max_similar_questions: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    pub max_tool_roundtrips: usize,
    pub max_duration_seconds: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_tool_roundtrips: 4,
            max_duration_seconds: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WeatherConfig {
    pub enabled: bool,
    pub geocoding_url: String,
    pub forecast_url: String,
    pub user_agent: String,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            geocoding_url: "https://nominatim.openstreetmap.org".to_string(),
            forecast_url: "https://api.open-meteo.com".to_string(),
            user_agent: concat!("secondbrain/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl SecondBrainConfig {
    /// Load from an optional TOML file, then apply `DATABASE_URL` and `APP_ENV`.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder().add_source(File::with_name(path).required(false));
        Self::build(
            builder,
            std::env::var("DATABASE_URL").ok(),
            std::env::var("APP_ENV").ok(),
        )
    }

    /// Same layering as [`load`](Self::load) with the file and env values passed in.
    pub fn from_toml_str(
        toml: &str,
        database_url: Option<String>,
        environment: Option<String>,
    ) -> Result<Self, ConfigError> {
        let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
        Self::build(builder, database_url, environment)
    }

    fn build(
        builder: ConfigBuilder<DefaultState>,
        database_url: Option<String>,
        environment: Option<String>,
    ) -> Result<Self, ConfigError> {
        let s = builder
            .set_override_option("database.url", database_url)?
            .set_override_option("environment", environment)?
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Message(
                "DATABASE_URL is required (set it in the environment or [database] url)".into(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Message(
                "embedding.dimensions must be greater than zero".into(),
            ));
        }
        // The in-memory test store takes any width; Postgres is fixed by the schema
        if self.environment != Environment::Test
            && self.embedding.dimensions as usize != crate::db::EMBEDDING_COLUMN_DIMENSIONS
        {
            return Err(ConfigError::Message(format!(
                "embedding.dimensions is {} but the embeddings column stores vector({})",
                self.embedding.dimensions,
                crate::db::EMBEDDING_COLUMN_DIMENSIONS
            )));
        }
        Ok(())
    }
}
