//! Embedding provider abstraction.
//!
//! The runtime consumes embedding backends through the
//! [`EmbeddingProvider`] trait: an opaque capability that maps text to a
//! fixed-length vector, reached over the network or running locally.
//! Concrete adapters (OpenAI-compatible APIs, local ONNX runtimes, ...)
//! live in application crates; this crate only defines the seam plus a
//! default [`embed_batch`](EmbeddingProvider::embed_batch) that loops
//! over [`embed`](EmbeddingProvider::embed) for backends without a true
//! multi-item call.

use async_trait::async_trait;

use crate::error::Result;

/// An embedding backend.
///
/// Implementations must be `Send + Sync`; the batch pipeline shares one
/// provider across concurrent workers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Backend family identifier (e.g. `"openai"`, `"local"`).
    fn provider_type(&self) -> &str;

    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Declared embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts. Output order mirrors input order 1:1.
    ///
    /// Backends with a genuine multi-item call should override this; the
    /// default embeds each text individually.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}
