use std::sync::Arc;

use crate::index::embedder::{Embedder, StaticEmbedder};
use crate::index::store::VectorIndex;

/// Shared state for the serve path (MCP tool surface).
///
/// Indexes are loaded once per `persist_dir` and cached; the embedding
/// model is shared across all loaded indexes.
#[derive(Clone)]
pub struct AppState {
    pub http_client: reqwest::Client,
    /// Loaded indexes keyed by canonical persist-dir path.
    pub index_cache: moka::future::Cache<String, Arc<VectorIndex>>,
    /// Embedding provider used for query-time encoding.
    pub embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("cached_indexes", &self.index_cache.entry_count())
            .finish()
    }
}

impl AppState {
    pub fn new() -> Self {
        let embedder: Arc<dyn Embedder> =
            Arc::new(StaticEmbedder::new(crate::core::config::embed_model_id()));
        Self {
            http_client: reqwest::Client::new(),
            index_cache: moka::future::Cache::builder()
                .max_capacity(16)
                .time_to_idle(std::time::Duration::from_secs(60 * 30))
                .build(),
            embedder,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
