pub mod embeddings;
pub mod index_manager;
pub mod retriever;
pub mod vector_store;
pub mod versioning;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::error::Result;
use self::embeddings::{Embedder, HashingEmbedder, OllamaEmbedder};

pub use self::index_manager::{BuildOutcome, BuildPolicy, IndexStatus, ReviewStore};
pub use self::retriever::Retriever;

/// Construct the embedding function selected in configuration.
pub fn embedder_from_config(
    config: &EmbeddingConfig,
    timeout: Duration,
) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider {
        EmbeddingProvider::Ollama => {
            tracing::info!("Using Ollama embeddings '{}' at {}", config.model, config.base_url);
            Arc::new(OllamaEmbedder::new(&config.base_url, &config.model, timeout)?)
        }
        EmbeddingProvider::Hashing => {
            tracing::info!("Using hashing embeddings with {} dimensions", config.dimension);
            Arc::new(HashingEmbedder::new(config.dimension))
        }
        #[cfg(feature = "fastembed")]
        EmbeddingProvider::Fastembed => {
            Arc::new(embeddings::FastEmbedder::new(&config.model_dir)?)
        }
        #[cfg(not(feature = "fastembed"))]
        EmbeddingProvider::Fastembed => {
            return Err(crate::error::RagError::Embedding(
                "fastembed provider requires building with --features fastembed".to_string(),
            ));
        }
    };
    Ok(embedder)
}
