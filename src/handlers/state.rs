//! Application state

use crate::config::Config;
use crate::embeddings::batch::{BatchConfig, BatchScheduler};
use crate::embeddings::cache::EmbeddingCache;
use crate::embeddings::{create_embedder, Embedder};
use crate::indexer::extract::FunctionExtractor;
use crate::indexer::pipeline::IndexPipeline;
use crate::retrieval::Retriever;
use crate::storage::FunctionStore;
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;

/// Everything a command needs, built once at startup and passed explicitly.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub scheduler: BatchScheduler,
    pub store: Arc<FunctionStore>,
    pub indexer: IndexPipeline,
    pub retriever: Retriever,
}

impl AppState {
    /// Build the state with the embedder selected by `config`.
    ///
    /// Must run inside a tokio runtime; it spawns the batch scheduler.
    pub fn open(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config)?;
        Self::with_embedder(config, embedder)
    }

    pub fn with_embedder(config: Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if embedder.dim() != config.embedding_dim {
            return Err(anyhow!(
                "Embedder '{}' produces {}-dimensional vectors but EMBEDDINGS_DIM is {}",
                embedder.model_name(),
                embedder.dim(),
                config.embedding_dim
            ));
        }

        let mut cache =
            EmbeddingCache::with_path(&config.cache_path, config.cache_ttl, config.embedding_dim);
        cache.load_from_disk();

        let store = FunctionStore::open(&config.store_path, config.embedding_dim)
            .with_context(|| format!("Failed to open STORE_PATH: {}", config.store_path.display()))?;

        let scheduler = BatchScheduler::spawn(embedder, cache, batch_config(&config));
        let extractor = FunctionExtractor::new().context("Failed to compile extractor patterns")?;

        let config = Arc::new(config);
        let store = Arc::new(store);
        let indexer = IndexPipeline::new(
            config.clone(),
            Arc::new(extractor),
            scheduler.clone(),
            store.clone(),
        );
        let retriever = Retriever::new(config.clone(), scheduler.clone(), store.clone());

        Ok(Self {
            config,
            scheduler,
            store,
            indexer,
            retriever,
        })
    }

    /// Drain pending embeddings and write the cache document.
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .context("Failed to flush embedding cache on shutdown")
    }
}

pub fn batch_config(config: &Config) -> BatchConfig {
    BatchConfig {
        batch_size: config.embedding_batch_size,
        window: config.batch_window,
        backoff: config.batch_backoff,
        max_retries: config.provider_max_retries,
        flush_every: config.cache_flush_every,
    }
}
