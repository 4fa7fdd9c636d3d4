use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::models::{Review, ScoredReview};

pub const INDEX_FORMAT_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "manifest.json";
pub const VECTORS_FILE: &str = "vectors.json";

/// Header written next to the vectors. Its presence marks a complete index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub embedder: String,
    pub dimension: usize,
    pub metric: String,
    pub document_count: usize,
    pub dataset_fingerprint: String,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub review: Review,
    pub embedding: Vec<f32>,
}

/// Exact cosine-similarity index over embedded reviews.
#[derive(Debug, Clone)]
pub struct ReviewIndex {
    manifest: IndexManifest,
    entries: Vec<IndexEntry>,
    norms: Vec<f32>,
}

fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

impl ReviewIndex {
    pub fn new(manifest: IndexManifest, entries: Vec<IndexEntry>) -> Self {
        let norms = entries.iter().map(|e| norm(&e.embedding)).collect();
        Self { manifest, entries, norms }
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Top-k entries by cosine similarity, highest first. Equal scores keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredReview>> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.manifest.dimension {
            return Err(RagError::Embedding(format!(
                "query vector has dimension {}, index expects {}",
                query.len(),
                self.manifest.dimension
            )));
        }

        let query_norm = norm(query);
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(i, (entry, entry_norm))| {
                let denom = query_norm * entry_norm;
                let score = if denom > 0.0 {
                    let dot: f32 = query.iter().zip(&entry.embedding).map(|(a, b)| a * b).sum();
                    dot / denom
                } else {
                    0.0
                };
                (i, if score.is_nan() { 0.0 } else { score })
            })
            .collect();

        // stable sort: ties stay in insertion order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredReview {
                review: self.entries[i].review.clone(),
                score,
            })
            .collect())
    }

    pub fn exists(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE).is_file()
    }

    pub fn read_manifest(dir: &Path) -> Result<IndexManifest> {
        let data = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn load(dir: &Path) -> Result<Self> {
        if !Self::exists(dir) {
            return Err(RagError::IndexNotBuilt);
        }
        let manifest = Self::read_manifest(dir)?;
        if manifest.format_version != INDEX_FORMAT_VERSION {
            return Err(RagError::Storage(format!(
                "unsupported index format version {}",
                manifest.format_version
            )));
        }

        let data = std::fs::read_to_string(dir.join(VECTORS_FILE))?;
        let entries: Vec<IndexEntry> = serde_json::from_str(&data)?;
        if entries.len() != manifest.document_count {
            return Err(RagError::Storage(format!(
                "manifest lists {} documents but {} were found",
                manifest.document_count,
                entries.len()
            )));
        }
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != manifest.dimension) {
            return Err(RagError::Storage(format!(
                "review '{}' has dimension {}, manifest says {}",
                bad.review.id,
                bad.embedding.len(),
                manifest.dimension
            )));
        }
        Ok(Self::new(manifest, entries))
    }

    /// Persist the index. The vectors are written before the manifest, each
    /// through a temporary file that is renamed into place, so a crash never
    /// leaves a manifest pointing at incomplete vectors.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let manifest_path = dir.join(MANIFEST_FILE);
        if manifest_path.exists() {
            std::fs::remove_file(&manifest_path)?;
        }
        write_atomic(&dir.join(VECTORS_FILE), &serde_json::to_vec(&self.entries)?)?;
        write_atomic(&manifest_path, &serde_json::to_vec_pretty(&self.manifest)?)?;
        Ok(())
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = PathBuf::from(path);
    tmp.set_extension("tmp");
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
