use sha2::{Digest, Sha256};

use crate::error::{RagError, Result};
use crate::models::Review;
use super::vector_store::IndexManifest;

/// Fingerprint of the review set an index was built from. Changes whenever
/// a review is added, removed, reordered or edited, including its extra
/// columns.
pub fn dataset_fingerprint(reviews: &[Review]) -> String {
    let mut hasher = Sha256::new();
    for review in reviews {
        hasher.update(review.id.as_bytes());
        hasher.update([0u8]);
        hasher.update(review.page_content().as_bytes());
        hasher.update([0u8]);
        if let Some(rating) = review.rating {
            hasher.update(rating.to_le_bytes());
        }
        hasher.update([0u8]);
        if let Some(date) = review.date {
            hasher.update(date.to_string().as_bytes());
        }
        // BTreeMap iterates in key order
        for (key, value) in &review.metadata {
            hasher.update([0u8]);
            hasher.update(key.as_bytes());
            hasher.update([1u8]);
            hasher.update(value.as_bytes());
        }
        hasher.update([0xffu8]);
    }
    hex::encode(hasher.finalize())
}

/// Fail fast when an index was embedded by a different function than the
/// one that will embed queries.
pub fn ensure_same_embedder(manifest: &IndexManifest, embedder_id: &str) -> Result<()> {
    if manifest.embedder != embedder_id {
        return Err(RagError::IndexMismatch {
            stored: manifest.embedder.clone(),
            configured: embedder_id.to_string(),
        });
    }
    Ok(())
}

/// True when the persisted index no longer reflects the given reviews.
pub fn is_stale(manifest: &IndexManifest, reviews: &[Review]) -> bool {
    manifest.dataset_fingerprint != dataset_fingerprint(reviews)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::vector_store::INDEX_FORMAT_VERSION;
    use chrono::Utc;

    fn manifest_for(reviews: &[Review]) -> IndexManifest {
        IndexManifest {
            format_version: INDEX_FORMAT_VERSION,
            embedder: "hashing-bow-v1:384".to_string(),
            dimension: 384,
            metric: "cosine".to_string(),
            document_count: reviews.len(),
            dataset_fingerprint: dataset_fingerprint(reviews),
            built_at: Utc::now(),
        }
    }

    #[test]
    fn test_fingerprint_tracks_edits() {
        let a = vec![Review::new("1", "Great crust")];
        let b = vec![Review::new("1", "Great crust!")];
        assert_eq!(dataset_fingerprint(&a), dataset_fingerprint(&a.clone()));
        assert_ne!(dataset_fingerprint(&a), dataset_fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_tracks_extra_columns() {
        let plain = vec![Review::new("1", "Great crust")];
        let mut tagged = plain.clone();
        tagged[0].metadata.insert("branch".to_string(), "downtown".to_string());
        let mut retagged = plain.clone();
        retagged[0].metadata.insert("branch".to_string(), "uptown".to_string());

        assert_ne!(dataset_fingerprint(&plain), dataset_fingerprint(&tagged));
        assert_ne!(dataset_fingerprint(&tagged), dataset_fingerprint(&retagged));
        assert!(is_stale(&manifest_for(&tagged), &retagged));
    }

    #[test]
    fn test_staleness() {
        let reviews = vec![Review::new("1", "Great crust")];
        let manifest = manifest_for(&reviews);
        assert!(!is_stale(&manifest, &reviews));
        assert!(is_stale(&manifest, &[Review::new("2", "Great crust")]));
    }

    #[test]
    fn test_embedder_mismatch() {
        let manifest = manifest_for(&[]);
        assert!(ensure_same_embedder(&manifest, "hashing-bow-v1:384").is_ok());
        let err = ensure_same_embedder(&manifest, "ollama:mxbai-embed-large").unwrap_err();
        assert!(matches!(err, RagError::IndexMismatch { .. }));
    }
}
