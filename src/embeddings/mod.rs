pub mod batch;
pub mod cache;
pub mod hash;
pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, EmbeddingsBackend};
use crate::error::ProviderError;

/// External embedding provider.
///
/// `embed` must return one vector per input text, in input order. Any error
/// is treated as a failure of the whole batch.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;

    fn model_name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Factory function to create an embedder based on the backend configuration.
///
/// # Errors
/// Returns error if the HTTP client for the OpenAI backend cannot be built
/// or its API key is missing.
pub fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.embeddings_backend {
        EmbeddingsBackend::OpenAi => {
            let api_key = config
                .openai_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is required for the openai backend"))?;
            Ok(Arc::new(openai::OpenAiEmbedder::new(
                &config.embeddings_api_url,
                &config.embeddings_model,
                api_key,
                config.embedding_dim,
                config.provider_timeout,
            )?))
        }
        EmbeddingsBackend::Hash => Ok(Arc::new(hash::HashEmbedder::new(config.embedding_dim))),
    }
}
