//! Semantic search over a vector store.
//!
//! # Algorithm
//!
//! 1. Embed the query text through the configured provider.
//! 2. Run k-nearest-neighbor retrieval against the store.
//! 3. Normalize raw distances to a "higher is better" similarity score.
//! 4. Apply the optional score floor, re-rank, and truncate to `k`.
//!
//! Distance-to-similarity normalization depends on the store's metric:
//!
//! | Metric | Raw distance | Similarity |
//! |--------|--------------|------------|
//! | Cosine | `1 - cos`    | `1 - distance` |
//! | L2     | euclidean    | `1 / (1 + distance)` |
//! | Dot    | dot product  | passed through unchanged |
//!
//! When a score floor is set, retrieval over-fetches (3x `k`) so that
//! filtering below-floor matches still leaves up to `k` survivors.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::change::validate_dims;
use crate::error::{Error, Result};
use crate::provider::EmbeddingProvider;
use crate::store::{DistanceMetric, VectorStore};

/// Over-fetch factor applied when a minimum score filters results.
const MIN_SCORE_FETCH_FACTOR: usize = 3;

/// Options for a semantic search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Maximum number of results to return. Zero is a configuration
    /// error.
    pub k: usize,
    /// Drop results scoring below this similarity.
    pub min_score: Option<f64>,
    /// Metadata filter forwarded to the store.
    pub filter: Option<serde_json::Value>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            k: 10,
            min_score: None,
            filter: None,
        }
    }
}

/// One search result, ranked by descending similarity.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResultItem {
    pub id: String,
    /// Normalized similarity; higher is more similar.
    pub score: f64,
    pub metadata: Option<serde_json::Value>,
}

/// Convert a store's raw distance into a similarity score.
pub fn similarity_from_distance(metric: DistanceMetric, distance: f64) -> f64 {
    match metric {
        DistanceMetric::Cosine => 1.0 - distance,
        DistanceMetric::L2 => 1.0 / (1.0 + distance),
        DistanceMetric::Dot => distance,
    }
}

/// Embed `query` and search the store.
///
/// An empty or whitespace-only query matches nothing and returns an
/// empty result set without calling the provider.
pub async fn semantic_search(
    query: &str,
    provider: &dyn EmbeddingProvider,
    store: &dyn VectorStore,
    options: &SearchOptions,
) -> Result<Vec<SearchResultItem>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }
    let vector = provider.embed(query).await?;
    validate_dims(&vector, provider.dims())?;
    search_with_vector(&vector, store, options).await
}

/// Search the store with an already-computed query vector.
pub async fn search_with_vector(
    vector: &[f32],
    store: &dyn VectorStore,
    options: &SearchOptions,
) -> Result<Vec<SearchResultItem>> {
    if options.k == 0 {
        return Err(Error::Config("search k must be > 0".to_string()));
    }

    let fetch = match options.min_score {
        Some(_) => options.k * MIN_SCORE_FETCH_FACTOR,
        None => options.k,
    };
    let matches = store.query(vector, fetch, options.filter.as_ref()).await?;
    debug!(fetched = matches.len(), k = options.k, "vector query returned");

    let metric = store.metric();
    let mut items: Vec<SearchResultItem> = matches
        .into_iter()
        .map(|m| SearchResultItem {
            id: m.id,
            score: similarity_from_distance(metric, m.distance),
            metadata: m.metadata,
        })
        .collect();

    if let Some(floor) = options.min_score {
        items.retain(|item| item.score >= floor);
    }
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    items.truncate(options.k);
    Ok(items)
}

/// Find the `k` vectors most similar to the one stored under `id`.
///
/// The anchor itself is excluded from the results.
///
/// # Errors
///
/// [`Error::Store`] if no vector is stored under `id`.
pub async fn find_similar(
    id: &str,
    store: &dyn VectorStore,
    k: usize,
) -> Result<Vec<SearchResultItem>> {
    if k == 0 {
        return Err(Error::Config("search k must be > 0".to_string()));
    }
    let vector = store
        .get(id)
        .await?
        .ok_or_else(|| Error::Store(format!("no vector stored under id '{id}'")))?;

    let options = SearchOptions {
        k: k + 1,
        min_score: None,
        filter: None,
    };
    let mut items = search_with_vector(&vector, store, &options).await?;
    items.retain(|item| item.id != id);
    items.truncate(k);
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryVectorStore;
    use serde_json::json;

    async fn seeded(metric: DistanceMetric) -> InMemoryVectorStore {
        let store = InMemoryVectorStore::new(metric);
        store
            .upsert("east", vec![1.0, 0.0], json!({"region": "e"}))
            .await
            .unwrap();
        store
            .upsert("north", vec![0.0, 1.0], json!({"region": "n"}))
            .await
            .unwrap();
        store
            .upsert("northeast", vec![0.7, 0.7], json!({"region": "e"}))
            .await
            .unwrap();
        store
    }

    #[test]
    fn test_similarity_normalization() {
        assert!((similarity_from_distance(DistanceMetric::Cosine, 0.25) - 0.75).abs() < 1e-9);
        assert!((similarity_from_distance(DistanceMetric::L2, 1.0) - 0.5).abs() < 1e-9);
        assert!((similarity_from_distance(DistanceMetric::Dot, 0.9) - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_zero_k_is_config_error() {
        let store = seeded(DistanceMetric::Cosine).await;
        let options = SearchOptions {
            k: 0,
            ..SearchOptions::default()
        };
        let result = search_with_vector(&[1.0, 0.0], &store, &options).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_results_ranked_by_descending_score() {
        let store = seeded(DistanceMetric::Cosine).await;
        let items = search_with_vector(&[1.0, 0.1], &store, &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].id, "east");
        assert!(items[0].score > items[1].score);
        assert!(items[1].score > items[2].score);
    }

    #[tokio::test]
    async fn test_min_score_filters_but_k_survives_overfetch() {
        let store = seeded(DistanceMetric::Cosine).await;
        let options = SearchOptions {
            k: 2,
            min_score: Some(0.5),
            filter: None,
        };
        let items = search_with_vector(&[0.7, 0.7], &store, &options).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.score >= 0.5));
    }

    #[tokio::test]
    async fn test_filter_is_forwarded_to_store() {
        let store = seeded(DistanceMetric::Cosine).await;
        let options = SearchOptions {
            k: 10,
            min_score: None,
            filter: Some(json!({"region": "e"})),
        };
        let items = search_with_vector(&[0.0, 1.0], &store, &options).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.id != "north"));
    }

    #[tokio::test]
    async fn test_find_similar_excludes_anchor() {
        let store = seeded(DistanceMetric::Cosine).await;
        let items = find_similar("east", &store, 2).await.unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.id != "east"));
        assert_eq!(items[0].id, "northeast");
    }

    #[tokio::test]
    async fn test_find_similar_missing_id_is_store_error() {
        let store = seeded(DistanceMetric::Cosine).await;
        let result = find_similar("ghost", &store, 2).await;
        assert!(matches!(result, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_equal_scores_tie_break_by_id() {
        let store = InMemoryVectorStore::new(DistanceMetric::L2);
        store.upsert("b", vec![1.0, 0.0], json!(null)).await.unwrap();
        store.upsert("a", vec![0.0, 1.0], json!(null)).await.unwrap();
        let items = search_with_vector(&[0.0, 0.0], &store, &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(items[0].id, "a");
        assert_eq!(items[1].id, "b");
    }
}
