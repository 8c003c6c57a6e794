//! Staleness detection and embedding reconciliation.
//!
//! Embeddings are expensive; the pipeline must not regenerate one when
//! the underlying chunk text and provider configuration are unchanged.
//! Staleness is decided by comparing a SHA-256 content hash plus the
//! provider's model identifier and dimensionality against what was stored
//! with the existing embedding.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::models::ChunkedEmbedding;

/// SHA-256 hex digest of `text`.
///
/// Pure and deterministic; two different chunk texts practically never
/// collide.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Whether a stored embedding must be regenerated.
///
/// True if the content hash, the dimensionality, or the model identifier
/// differs from what the embedding was generated with.
pub fn should_regenerate(
    current_hash: &str,
    stored_hash: &str,
    current_dims: usize,
    stored_dims: usize,
    current_model: &str,
    stored_model: &str,
) -> bool {
    current_hash != stored_hash || current_dims != stored_dims || current_model != stored_model
}

/// Reject a vector whose length does not match the declared
/// dimensionality.
///
/// A mismatch indicates a provider or model misconfiguration, not a
/// transient fault: callers must treat it as non-retryable.
pub fn validate_dims(vector: &[f32], expected: usize) -> Result<()> {
    if vector.len() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Reconcile freshly generated embeddings into an existing mapping keyed
/// by chunk id.
///
/// Fresh entries overwrite existing ones. Entries whose chunk id is not
/// in `current_ids` (the source shrank and the chunk no longer exists)
/// are dropped, garbage-collecting orphaned embeddings.
pub fn merge_embeddings(
    mut existing: HashMap<String, ChunkedEmbedding>,
    fresh: Vec<ChunkedEmbedding>,
    current_ids: &HashSet<String>,
) -> HashMap<String, ChunkedEmbedding> {
    existing.retain(|id, _| current_ids.contains(id));
    for entry in fresh {
        existing.insert(entry.chunk.id.clone(), entry);
    }
    existing
}
