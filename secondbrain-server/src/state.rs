use std::sync::Arc;

use secondbrain_core::{EmbeddingBackend, KnowledgeStore, LanguageModel, SecondBrainConfig};

use crate::subsystems::weather::WeatherClient;

/// Everything a chat request needs. Cloned per request, backends are shared.
#[derive(Clone)]
pub struct AppState {
    pub config: SecondBrainConfig,
    pub model: Arc<dyn LanguageModel>,
    pub embedder: Arc<dyn EmbeddingBackend>,
    pub store: Arc<dyn KnowledgeStore>,
    /// `None` when the weather tool is disabled.
    pub weather: Option<WeatherClient>,
}
