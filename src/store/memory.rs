//! In-memory [`VectorStore`] implementation for testing and small
//! corpora.
//!
//! Uses a `HashMap` behind `std::sync::RwLock` for thread safety.
//! Queries are brute-force scans over all stored vectors, ranked by the
//! configured [`DistanceMetric`].

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Result;

use super::{DistanceMetric, VectorMatch, VectorStore};

struct StoredVector {
    vector: Vec<f32>,
    metadata: serde_json::Value,
}

/// Brute-force in-memory vector store.
pub struct InMemoryVectorStore {
    metric: DistanceMetric,
    entries: RwLock<HashMap<String, StoredVector>>,
}

impl InMemoryVectorStore {
    pub fn new(metric: DistanceMetric) -> Self {
        Self {
            metric,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new(DistanceMetric::Cosine)
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x * y) as f64).sum();
    let mag_a: f64 = a.iter().map(|x| (x * x) as f64).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (x * x) as f64).sum::<f64>().sqrt();
    if mag_a < f64::EPSILON || mag_b < f64::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f64 {
    match metric {
        DistanceMetric::Cosine => 1.0 - cosine_sim(a, b),
        DistanceMetric::L2 => a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| {
                let d = (x - y) as f64;
                d * d
            })
            .sum::<f64>()
            .sqrt(),
        DistanceMetric::Dot => a.iter().zip(b.iter()).map(|(x, y)| (x * y) as f64).sum(),
    }
}

/// True when every key/value pair of the filter object appears in
/// `metadata`. A non-object filter matches nothing.
fn matches_filter(metadata: &serde_json::Value, filter: &serde_json::Value) -> bool {
    match filter.as_object() {
        Some(wanted) => wanted
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value)),
        None => false,
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: serde_json::Value) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.insert(id.to_string(), StoredVector { vector, metadata });
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&serde_json::Value>,
    ) -> Result<Vec<VectorMatch>> {
        let entries = self.entries.read().unwrap();
        let mut matches: Vec<VectorMatch> = entries
            .iter()
            .filter(|(_, stored)| match filter {
                Some(f) => matches_filter(&stored.metadata, f),
                None => true,
            })
            .map(|(id, stored)| VectorMatch {
                id: id.clone(),
                distance: distance(self.metric, vector, &stored.vector),
                metadata: if stored.metadata.is_null() {
                    None
                } else {
                    Some(stored.metadata.clone())
                },
            })
            .collect();

        // Dot ranks descending (higher product is closer); the distance
        // metrics rank ascending. Ties break by id either way.
        matches.sort_by(|a, b| {
            let ordering = match self.metric {
                DistanceMetric::Dot => b
                    .distance
                    .partial_cmp(&a.distance)
                    .unwrap_or(std::cmp::Ordering::Equal),
                _ => a
                    .distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(std::cmp::Ordering::Equal),
            };
            ordering.then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn get(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.get(id).map(|stored| stored.vector.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.remove(id);
        Ok(())
    }
}
