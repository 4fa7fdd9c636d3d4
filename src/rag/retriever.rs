use std::sync::Arc;

use crate::error::{RagError, Result};
use crate::models::ScoredReview;
use super::embeddings::Embedder;
use super::vector_store::ReviewIndex;

/// Read-only view over a built index, paired with the embedder that built it.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<ReviewIndex>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(index: Arc<ReviewIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self { index, embedder }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The `k` reviews most similar to `query`, best first.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredReview>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidQuery("query must not be empty".to_string()));
        }
        if k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed_one(query).await?;
        let results = self.index.search(&query_embedding, k)?;
        tracing::debug!("Retrieved {} reviews for query '{}'", results.len(), query);
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Review;
    use crate::rag::embeddings::HashingEmbedder;
    use crate::rag::vector_store::{IndexEntry, IndexManifest, INDEX_FORMAT_VERSION};
    use chrono::Utc;

    async fn retriever_over(texts: &[&str]) -> Retriever {
        let embedder = Arc::new(HashingEmbedder::new(256));
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let vectors = embedder.embed(&owned).await.unwrap();
        let entries: Vec<IndexEntry> = texts
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, embedding))| IndexEntry {
                review: Review::new(i.to_string(), *text),
                embedding,
            })
            .collect();
        let manifest = IndexManifest {
            format_version: INDEX_FORMAT_VERSION,
            embedder: embedder.model_id(),
            dimension: 256,
            metric: "cosine".to_string(),
            document_count: entries.len(),
            dataset_fingerprint: String::new(),
            built_at: Utc::now(),
        };
        Retriever::new(Arc::new(ReviewIndex::new(manifest, entries)), embedder)
    }

    #[tokio::test]
    async fn test_results_bounded_and_sorted() {
        let retriever = retriever_over(&[
            "pepperoni pizza was great",
            "the delivery driver was late",
            "pizza crust was soggy",
            "friendly staff and great pizza",
        ])
        .await;

        let results = retriever.retrieve("great pizza", 3).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_repeated_queries_are_identical() {
        let retriever = retriever_over(&["a b", "b c", "c d", "a b"]).await;
        let first = retriever.retrieve("b", 4).await.unwrap();
        let second = retriever.retrieve("b", 4).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_empty_index_and_zero_k() {
        let empty = retriever_over(&[]).await;
        assert!(empty.retrieve("anything", 5).await.unwrap().is_empty());

        let retriever = retriever_over(&["pizza"]).await;
        assert!(retriever.retrieve("pizza", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_query_rejected() {
        let retriever = retriever_over(&["pizza"]).await;
        assert!(matches!(retriever.retrieve("   ", 1).await, Err(RagError::InvalidQuery(_))));
    }
}
