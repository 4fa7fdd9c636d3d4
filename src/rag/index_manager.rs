use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::{RagError, Result};
use crate::models::{Review, ScoredReview};
use super::embeddings::Embedder;
use super::retriever::Retriever;
use super::vector_store::{IndexEntry, IndexManifest, ReviewIndex, INDEX_FORMAT_VERSION};
use super::versioning;

const EMBED_BATCH_SIZE: usize = 32;

/// Whether an index already persisted on disk may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPolicy {
    ForceRebuild,
    ReuseIfPresent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatus {
    pub is_built: bool,
    pub is_indexing: bool,
    pub document_count: usize,
    pub embedder: String,
    pub dimension: Option<usize>,
    pub built_at: Option<DateTime<Utc>>,
    pub dataset_fingerprint: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// True when an index persisted by an earlier run was loaded instead of
    /// embedding the reviews again.
    pub reused: bool,
    pub status: IndexStatus,
}

#[derive(Debug, Default)]
struct BuildState {
    is_indexing: bool,
    last_error: Option<String>,
}

/// Owns the review index: builds it from reviews, persists it, loads it back
/// and hands out retrievers over it.
pub struct ReviewStore {
    index_dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    index: RwLock<Option<Arc<ReviewIndex>>>,
    state: Mutex<BuildState>,
}

impl fmt::Debug for ReviewStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReviewStore")
            .field("index_dir", &self.index_dir)
            .field("embedder", &self.embedder.model_id())
            .finish_non_exhaustive()
    }
}

impl ReviewStore {
    pub fn new(index_dir: PathBuf, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index_dir,
            embedder,
            index: RwLock::new(None),
            state: Mutex::new(BuildState::default()),
        }
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub async fn status(&self) -> IndexStatus {
        let index = self.index.read().await.clone();
        let state = self.state.lock().await;
        let manifest = index.as_ref().map(|i| i.manifest());
        IndexStatus {
            is_built: index.is_some(),
            is_indexing: state.is_indexing,
            document_count: index.as_ref().map(|i| i.len()).unwrap_or(0),
            embedder: self.embedder.model_id(),
            dimension: manifest.map(|m| m.dimension),
            built_at: manifest.map(|m| m.built_at),
            dataset_fingerprint: manifest.map(|m| m.dataset_fingerprint.clone()),
            last_error: state.last_error.clone(),
        }
    }

    pub async fn build(&self, reviews: &[Review], policy: BuildPolicy) -> Result<BuildOutcome> {
        self.build_with_progress(reviews, policy, |_| {}).await
    }

    /// Build (or reuse) the index. `on_progress` receives the number of
    /// reviews embedded by each completed batch.
    pub async fn build_with_progress<F>(
        &self,
        reviews: &[Review],
        policy: BuildPolicy,
        on_progress: F,
    ) -> Result<BuildOutcome>
    where
        F: FnMut(usize) + Send,
    {
        {
            let mut state = self.state.lock().await;
            if state.is_indexing {
                return Err(RagError::Storage("Indexing already in progress".to_string()));
            }
            state.is_indexing = true;
            state.last_error = None;
        }

        let result = self.do_build(reviews, policy, on_progress).await;

        {
            let mut state = self.state.lock().await;
            state.is_indexing = false;
            if let Err(ref e) = result {
                tracing::error!("Index build failed: {}", e);
                state.last_error = Some(e.to_string());
            }
        }

        let reused = result?;
        Ok(BuildOutcome { reused, status: self.status().await })
    }

    async fn do_build<F>(
        &self,
        reviews: &[Review],
        policy: BuildPolicy,
        mut on_progress: F,
    ) -> Result<bool>
    where
        F: FnMut(usize) + Send,
    {
        if reviews.is_empty() {
            return Err(RagError::DataLoad("no reviews to index".to_string()));
        }
        let mut ids = HashSet::with_capacity(reviews.len());
        for review in reviews {
            if !ids.insert(review.id.as_str()) {
                return Err(RagError::DataLoad(format!("duplicate review id '{}'", review.id)));
            }
        }

        if policy == BuildPolicy::ReuseIfPresent && ReviewIndex::exists(&self.index_dir) {
            let index = self.open_checked().await?;
            if versioning::is_stale(index.manifest(), reviews) {
                tracing::warn!(
                    "Index at {} was built from a different dataset; \
                     reusing it anyway (rebuild to refresh)",
                    self.index_dir.display()
                );
            }
            tracing::info!(
                "Reusing index at {} ({} documents)",
                self.index_dir.display(),
                index.len()
            );
            *self.index.write().await = Some(Arc::new(index));
            return Ok(true);
        }

        tracing::info!(
            "Embedding {} reviews with {}",
            reviews.len(),
            self.embedder.model_id()
        );

        let mut entries = Vec::with_capacity(reviews.len());
        for batch in reviews.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(Review::page_content).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "embedder returned {} vectors for {} reviews",
                    vectors.len(),
                    batch.len()
                )));
            }
            for (review, embedding) in batch.iter().zip(vectors) {
                entries.push(IndexEntry { review: review.clone(), embedding });
            }
            on_progress(batch.len());
        }

        let dimension = entries.first().map(|e| e.embedding.len()).unwrap_or(0);
        if dimension == 0 {
            return Err(RagError::Embedding("embedder returned empty vectors".to_string()));
        }
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dimension) {
            return Err(RagError::Embedding(format!(
                "review '{}' has dimension {}, expected {}",
                bad.review.id,
                bad.embedding.len(),
                dimension
            )));
        }

        let manifest = IndexManifest {
            format_version: INDEX_FORMAT_VERSION,
            embedder: self.embedder.model_id(),
            dimension,
            metric: "cosine".to_string(),
            document_count: entries.len(),
            dataset_fingerprint: versioning::dataset_fingerprint(reviews),
            built_at: Utc::now(),
        };
        let index = Arc::new(ReviewIndex::new(manifest, entries));
        let (to_save, dir) = (Arc::clone(&index), self.index_dir.clone());
        tokio::task::spawn_blocking(move || to_save.save(&dir))
            .await
            .map_err(|e| RagError::Storage(format!("index write task failed: {}", e)))??;

        tracing::info!(
            "Index built: {} documents, dimension {}, stored in {}",
            index.len(),
            dimension,
            self.index_dir.display()
        );
        *self.index.write().await = Some(index);
        Ok(false)
    }

    /// Load an index persisted by an earlier run without touching the dataset.
    pub async fn load_existing(&self) -> Result<IndexStatus> {
        let index = self.open_checked().await?;
        tracing::info!(
            "Loaded index from {} ({} documents)",
            self.index_dir.display(),
            index.len()
        );
        *self.index.write().await = Some(Arc::new(index));
        Ok(self.status().await)
    }

    async fn open_checked(&self) -> Result<ReviewIndex> {
        let dir = self.index_dir.clone();
        let index = tokio::task::spawn_blocking(move || ReviewIndex::load(&dir))
            .await
            .map_err(|e| RagError::Storage(format!("index read task failed: {}", e)))??;
        versioning::ensure_same_embedder(index.manifest(), &self.embedder.model_id())?;
        Ok(index)
    }

    pub async fn retriever(&self) -> Result<Retriever> {
        let index = self.index.read().await.clone().ok_or(RagError::IndexNotBuilt)?;
        Ok(Retriever::new(index, Arc::clone(&self.embedder)))
    }

    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredReview>> {
        self.retriever().await?.retrieve(query, k).await
    }
}
