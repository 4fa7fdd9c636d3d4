use std::sync::Arc;

use anyhow::Result;

use crate::chat::ChatPipeline;
use crate::config::AppConfig;
use crate::indexer::dataset::load_reviews;
use crate::logger::Logger;
use crate::prompt::PromptTemplate;
use crate::proxy::generator_from_config;
use crate::rag::{embedder_from_config, BuildOutcome, BuildPolicy, ReviewStore};

/// Load the dataset and build (or reuse) the index before any query is
/// accepted.
pub async fn prepare_store(
    config: &AppConfig,
    policy: BuildPolicy,
) -> Result<(Arc<ReviewStore>, BuildOutcome)> {
    let embedder = embedder_from_config(&config.embedding, config.generation.timeout())?;
    let store = Arc::new(ReviewStore::new(config.index_dir.clone(), embedder));

    let reviews = load_reviews(&config.dataset_path)?;
    let outcome = store.build(&reviews, policy).await?;
    if outcome.reused {
        tracing::info!("Review index ready (reused, {} documents)", outcome.status.document_count);
    } else {
        tracing::info!("Review index ready (built, {} documents)", outcome.status.document_count);
    }
    Ok((store, outcome))
}

/// Wire a chat pipeline from configuration around an already prepared store.
pub async fn build_pipeline(
    config: &AppConfig,
    store: Arc<ReviewStore>,
    template: PromptTemplate,
) -> Result<ChatPipeline> {
    let generator = generator_from_config(&config.generation)?;
    let mut pipeline = ChatPipeline::new(store, generator, template, config.top_k);
    if let Some(ref path) = config.turn_log {
        let logger = Logger::new(path).await?;
        tracing::info!("Logging turns to {}", logger.path().display());
        pipeline = pipeline.with_logger(Arc::new(logger));
    }
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingProvider;
    use crate::error::RagError;
    use crate::rag::vector_store::ReviewIndex;

    fn hashing_config(dir: &std::path::Path, csv: &str) -> AppConfig {
        let dataset = dir.join("reviews.csv");
        std::fs::write(&dataset, csv).unwrap();
        let mut config = AppConfig::default();
        config.dataset_path = dataset;
        config.index_dir = dir.join("index");
        config.embedding.provider = EmbeddingProvider::Hashing;
        config
    }

    #[tokio::test]
    async fn test_malformed_dataset_creates_no_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = hashing_config(dir.path(), "title,date,rating\nGood,2025-01-01,5\n");

        let err = prepare_store(&config, BuildPolicy::ReuseIfPresent).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<RagError>(), Some(RagError::DataLoad(_))));
        assert!(!config.index_dir.exists());
    }

    #[tokio::test]
    async fn test_second_start_reuses_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = hashing_config(
            dir.path(),
            concat!(
                "Title,Date,Rating,Review\n",
                "Fast,2025-01-01,5,\"Great crust, fast delivery\"\n",
                "Slow,2025-01-02,1,\"Cold pizza, slow service\"\n",
            ),
        );

        let (_, first) = prepare_store(&config, BuildPolicy::ReuseIfPresent).await.unwrap();
        assert!(!first.reused);
        let (store, second) = prepare_store(&config, BuildPolicy::ReuseIfPresent).await.unwrap();
        assert!(second.reused);
        assert_eq!(second.status.dataset_fingerprint, first.status.dataset_fingerprint);
        assert!(ReviewIndex::exists(store.index_dir()));

        let (_, forced) = prepare_store(&config, BuildPolicy::ForceRebuild).await.unwrap();
        assert!(!forced.reused);
    }
}
