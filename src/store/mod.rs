//! Vector storage abstraction.
//!
//! The [`VectorStore`] trait defines the storage operations the search
//! pipeline needs, enabling pluggable backends (in-memory, a database
//! extension, a dedicated vector service).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Distance function a store ranks by.
///
/// The store returns raw distances in this metric; score normalization
/// to a "higher is better" similarity happens in the search layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Cosine distance, `1 - cos(a, b)`. Lower is closer.
    #[default]
    Cosine,
    /// Euclidean distance. Lower is closer.
    L2,
    /// Negated ranking on the raw dot product. Higher is closer.
    Dot,
}

/// One ranked entry returned from [`VectorStore::query`].
#[derive(Debug, Clone)]
pub struct VectorMatch {
    /// Id the vector was upserted under.
    pub id: String,
    /// Raw distance in the store's [`DistanceMetric`].
    pub distance: f64,
    /// Metadata stored alongside the vector, if any.
    pub metadata: Option<serde_json::Value>,
}

/// Abstract vector storage backend.
///
/// All operations are async (via `async-trait`); in-memory
/// implementations return immediately-ready futures.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace a vector by id |
/// | [`query`](VectorStore::query) | k-nearest-neighbor search |
/// | [`get`](VectorStore::get) | Retrieve a stored vector by id |
/// | [`delete`](VectorStore::delete) | Remove a vector by id |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The metric this store ranks by.
    fn metric(&self) -> DistanceMetric;

    /// Insert or replace the vector stored under `id`.
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: serde_json::Value) -> Result<()>;

    /// Return up to `k` nearest vectors, closest first.
    ///
    /// Ties on distance break by ascending id so rankings are
    /// deterministic. `filter` restricts candidates to vectors whose
    /// metadata contains every key/value pair of the filter object.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&serde_json::Value>,
    ) -> Result<Vec<VectorMatch>>;

    /// Retrieve the stored vector for `id`, if present.
    async fn get(&self, id: &str) -> Result<Option<Vec<f32>>>;

    /// Remove the vector stored under `id`. Removing an absent id is
    /// not an error.
    async fn delete(&self, id: &str) -> Result<()>;
}
