use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::{OllamaEmbedRequest, OllamaEmbedResponse};

/// A text embedding function.
///
/// `model_id` identifies the function and its version; it is stamped into the
/// index manifest so an index is never queried with vectors from another
/// embedding space.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> String;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        if vectors.len() != 1 {
            return Err(RagError::Embedding(format!(
                "expected 1 vector, got {}",
                vectors.len()
            )));
        }
        Ok(vectors.remove(0))
    }
}

/// Embeddings served by a local Ollama instance.
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Embedding(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_id(&self) -> String {
        format!("ollama:{}", self.model)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&OllamaEmbedRequest { model: &self.model, input: texts })
            .send()
            .await
            .map_err(|e| RagError::Embedding(format!("request to {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Embedding(format!("Ollama returned {} - {}", status, body)));
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| RagError::Embedding(format!("invalid embed response: {}", e)))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        Ok(parsed.embeddings)
    }
}

static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());

/// Offline bag-of-words embedder using feature hashing.
///
/// Tokens are lower-cased words; each token adds one to the bucket picked by
/// the first bytes of its SHA-256 digest. The result is deterministic across
/// runs and platforms, which makes it suitable for tests and for running
/// without a model server. Lexical overlap is the only notion of similarity.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        for token in TOKEN_PATTERN.find_iter(&lowered) {
            let digest = Sha256::digest(token.as_str().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_id(&self) -> String {
        format!("hashing-bow-v1:{}", self.dimension)
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }
}

#[cfg(feature = "fastembed")]
pub use self::local::FastEmbedder;

#[cfg(feature = "fastembed")]
mod local {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use async_trait::async_trait;
    use fastembed::{
        InitOptionsUserDefined, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel,
    };

    use super::Embedder;
    use crate::error::{RagError, Result};

    /// ONNX embedding model loaded from local files.
    pub struct FastEmbedder {
        model: Arc<TextEmbedding>,
        model_dir: PathBuf,
    }

    fn read_model_file(dir: &Path, name: &str) -> Result<Vec<u8>> {
        std::fs::read(dir.join(name))
            .map_err(|e| RagError::Embedding(format!("Failed to read {}: {}", name, e)))
    }

    impl FastEmbedder {
        pub fn new(model_dir: &Path) -> Result<Self> {
            tracing::info!("Initializing embedding model from {}", model_dir.display());

            if !model_dir.exists() {
                return Err(RagError::Embedding(format!(
                    "Model directory not found: {}",
                    model_dir.display()
                )));
            }

            let user_model = UserDefinedEmbeddingModel {
                onnx_file: read_model_file(model_dir, "model.onnx")?,
                tokenizer_files: TokenizerFiles {
                    tokenizer_file: read_model_file(model_dir, "tokenizer.json")?,
                    config_file: read_model_file(model_dir, "config.json")?,
                    special_tokens_map_file: read_model_file(
                        model_dir,
                        "special_tokens_map.json",
                    )?,
                    tokenizer_config_file: read_model_file(model_dir, "tokenizer_config.json")?,
                },
            };

            let model = TextEmbedding::try_new_from_user_defined(
                user_model,
                InitOptionsUserDefined::default(),
            )
            .map_err(|e| {
                RagError::Embedding(format!("Failed to initialize embedding model: {}", e))
            })?;

            tracing::info!("Embedding model initialized successfully");
            Ok(Self {
                model: Arc::new(model),
                model_dir: model_dir.to_path_buf(),
            })
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        fn model_id(&self) -> String {
            let name = self
                .model_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| self.model_dir.display().to_string());
            format!("fastembed:{}", name)
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            // ONNX inference is CPU bound
            let model = Arc::clone(&self.model);
            let texts = texts.to_vec();
            tokio::task::spawn_blocking(move || model.embed(texts, None))
                .await
                .map_err(|e| RagError::Embedding(format!("embedding task failed: {}", e)))?
                .map_err(|e| RagError::Embedding(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (na * nb)
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed_one("Great crust, fast delivery").await.unwrap();
        let b = embedder.embed_one("great CRUST fast delivery!").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hashing_embedder_prefers_shared_words() {
        let embedder = HashingEmbedder::new(384);
        let query = embedder.embed_one("Is the delivery fast?").await.unwrap();
        let hit = embedder.embed_one("Great crust, fast delivery").await.unwrap();
        let miss = embedder.embed_one("Cold pizza, slow service").await.unwrap();
        assert!(cosine(&query, &hit) > cosine(&query, &miss));
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let embedder = HashingEmbedder::new(32);
        let texts = vec!["one".to_string(), "two".to_string()];
        let batch = embedder.embed(&texts).await.unwrap();
        assert_eq!(batch[1], embedder.embed_one("two").await.unwrap());
    }

    #[test]
    fn test_model_id_includes_dimension() {
        assert_eq!(HashingEmbedder::new(128).model_id(), "hashing-bow-v1:128");
    }
}
