//! Core data types that flow through the embedding pipeline.
//!
//! A source text is split into [`TextChunk`]s, each chunk is embedded into
//! an [`EmbeddingResult`], and the pair is stored as a [`ChunkedEmbedding`]
//! together with the content hash used for staleness detection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bounded contiguous span of a larger source text, the unit of embedding.
///
/// Immutable once produced. Offsets are byte offsets into the source text,
/// always on UTF-8 character boundaries, with `start_offset < end_offset`.
/// Chunks for one source are produced in ascending `index` / `start_offset`
/// order.
///
/// The `id` is a deterministic UUIDv5 derived from `source_id` and `index`,
/// so re-chunking identical text yields identical ids. Stable ids are what
/// make change detection and embedding reconciliation work across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Deterministic chunk UUID.
    pub id: String,
    /// Identifier of the source text this chunk was cut from.
    pub source_id: String,
    /// The chunk's text, an exact slice of the source.
    pub text: String,
    /// Byte offset of the chunk's first character in the source.
    pub start_offset: usize,
    /// Byte offset one past the chunk's last character.
    pub end_offset: usize,
    /// Cheap token-count approximation, for progress and limit estimation
    /// only. Never used for correctness-critical decisions.
    pub token_estimate: usize,
    /// Position of this chunk among its source's chunks, starting at 0.
    pub index: usize,
}

/// A fixed-length numeric vector representing a text's semantic content.
///
/// Invariant: `vector.len() == dimensions` as declared by the provider.
/// A mismatch is rejected at generation time (see
/// [`validate_dims`](crate::change::validate_dims)).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    /// The embedding vector.
    pub vector: Vec<f32>,
    /// Model identifier that produced the vector.
    pub model: String,
    /// Declared dimensionality; equals `vector.len()`.
    pub dimensions: usize,
    /// Token count reported or estimated for the embedded text.
    pub tokens: Option<usize>,
}

/// A chunk paired with its embedding and the content hash of the chunk
/// text at generation time.
///
/// `content_hash` is compared against the current chunk text's hash to
/// decide whether the embedding is stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkedEmbedding {
    pub chunk: TextChunk,
    pub embedding: EmbeddingResult,
    /// SHA-256 hex digest of `chunk.text` at generation time.
    pub content_hash: String,
    /// When the embedding was generated.
    pub generated_at: DateTime<Utc>,
}
