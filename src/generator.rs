//! Embedding generation pipeline.
//!
//! # Algorithm
//!
//! 1. Chunk every source text with the configured [`ChunkingOptions`].
//! 2. For each chunk, compare its content hash plus the provider's model
//!    and dimensionality against any existing embedding; unchanged
//!    chunks are skipped without a provider call.
//! 3. Send the stale chunks through the batch queue: grouped provider
//!    calls where possible, per-item fallback on group failure, rate
//!    limiting and bounded concurrency throughout.
//! 4. Reconcile the fresh embeddings into the existing mapping, dropping
//!    embeddings for chunks that no longer exist.
//!
//! A failed chunk costs one [`BatchError`]; it never aborts its
//! siblings. Re-running over unchanged sources makes zero provider
//! calls and returns an equal mapping.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::change::{hash_text, merge_embeddings, should_regenerate, validate_dims};
use crate::chunk::{chunk_text, estimate_token_count, ChunkingOptions};
use crate::error::{Error, Result};
use crate::models::{ChunkedEmbedding, EmbeddingResult, TextChunk};
use crate::provider::EmbeddingProvider;
use crate::queue::{batch_process_grouped, BatchError, BatchOptions, BatchProgress};

/// Outcome of one [`generate_embeddings`] run.
#[derive(Debug)]
pub struct GenerateReport {
    /// Embeddings per source id, sorted by chunk index.
    pub embeddings: HashMap<String, Vec<ChunkedEmbedding>>,
    /// Chunks whose embedding failed, ordered by queue position.
    pub errors: Vec<BatchError<TextChunk>>,
    /// Final queue progress (covers only the chunks actually sent).
    pub progress: BatchProgress,
    /// Chunks reused from the existing mapping without a provider call.
    pub skipped: usize,
    /// Chunks embedded in this run.
    pub generated: usize,
}

/// Embed a single text through `provider`.
///
/// The vector is validated against the provider's declared
/// dimensionality before it is returned.
pub async fn generate_embedding(
    text: &str,
    provider: &dyn EmbeddingProvider,
) -> Result<EmbeddingResult> {
    let vector = provider.embed(text).await?;
    validate_dims(&vector, provider.dims())?;
    Ok(EmbeddingResult {
        vector,
        model: provider.model_name().to_string(),
        dimensions: provider.dims(),
        tokens: Some(estimate_token_count(text)),
    })
}

/// Chunk `sources` and embed every chunk that is new or stale.
///
/// `sources` pairs a source id with its full text. `existing` is the
/// mapping from a previous run, keyed by chunk id; pass `None` on the
/// first run. See the module docs for the skip, failure, and
/// reconciliation contracts.
///
/// # Errors
///
/// Only chunking and configuration errors are returned as `Err`;
/// per-chunk provider failures are collected in
/// [`GenerateReport::errors`].
pub async fn generate_embeddings(
    sources: &[(String, String)],
    provider: Arc<dyn EmbeddingProvider>,
    chunking: &ChunkingOptions,
    batch: &BatchOptions,
    existing: Option<&HashMap<String, ChunkedEmbedding>>,
) -> Result<GenerateReport> {
    let mut chunks: Vec<TextChunk> = Vec::new();
    for (source_id, text) in sources {
        chunks.extend(chunk_text(source_id, text, chunking)?);
    }
    let current_ids: HashSet<String> = chunks.iter().map(|c| c.id.clone()).collect();

    // Partition into reusable and stale before touching the provider.
    let mut pending: Vec<TextChunk> = Vec::new();
    let mut skipped = 0usize;
    for chunk in chunks {
        let reusable = existing
            .and_then(|map| map.get(&chunk.id))
            .is_some_and(|stored| {
                !should_regenerate(
                    &hash_text(&chunk.text),
                    &stored.content_hash,
                    provider.dims(),
                    stored.embedding.dimensions,
                    provider.model_name(),
                    &stored.embedding.model,
                )
            });
        if reusable {
            skipped += 1;
        } else {
            pending.push(chunk);
        }
    }
    debug!(
        total = current_ids.len(),
        pending = pending.len(),
        skipped,
        "change detection complete"
    );

    let batch_provider = provider.clone();
    let item_provider = provider.clone();
    let outcome = batch_process_grouped(
        pending,
        move |group: Vec<TextChunk>| {
            let provider = batch_provider.clone();
            async move {
                let texts: Vec<String> = group.iter().map(|c| c.text.clone()).collect();
                let vectors = provider.embed_batch(&texts).await?;
                if vectors.len() != group.len() {
                    return Err(Error::Provider(format!(
                        "batch embed returned {} vectors for {} inputs",
                        vectors.len(),
                        group.len()
                    )));
                }
                group
                    .into_iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| embedded(chunk, vector, provider.as_ref()))
                    .collect()
            }
        },
        move |chunk: TextChunk| {
            let provider = item_provider.clone();
            async move {
                let vector = provider.embed(&chunk.text).await?;
                embedded(chunk, vector, provider.as_ref())
            }
        },
        batch,
    )
    .await?;

    let generated = outcome.results.len();
    let merged = merge_embeddings(
        existing.cloned().unwrap_or_default(),
        outcome.results,
        &current_ids,
    );

    let mut embeddings: HashMap<String, Vec<ChunkedEmbedding>> = HashMap::new();
    for entry in merged.into_values() {
        embeddings
            .entry(entry.chunk.source_id.clone())
            .or_default()
            .push(entry);
    }
    for entries in embeddings.values_mut() {
        entries.sort_by_key(|e| e.chunk.index);
    }

    info!(
        sources = sources.len(),
        generated,
        skipped,
        failed = outcome.errors.len(),
        "embedding generation finished"
    );
    Ok(GenerateReport {
        embeddings,
        errors: outcome.errors,
        progress: outcome.progress,
        skipped,
        generated,
    })
}

fn embedded(
    chunk: TextChunk,
    vector: Vec<f32>,
    provider: &dyn EmbeddingProvider,
) -> Result<ChunkedEmbedding> {
    validate_dims(&vector, provider.dims())?;
    let content_hash = hash_text(&chunk.text);
    let tokens = Some(chunk.token_estimate);
    Ok(ChunkedEmbedding {
        chunk,
        embedding: EmbeddingResult {
            vector,
            model: provider.model_name().to_string(),
            dimensions: provider.dims(),
            tokens,
        },
        content_hash,
        generated_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkStrategy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic test backend: the vector encodes the text length.
    struct FakeProvider {
        dims: usize,
        fail_marker: Option<&'static str>,
        embed_calls: AtomicUsize,
        batch_calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(dims: usize) -> Self {
            Self {
                dims,
                fail_marker: None,
                embed_calls: AtomicUsize::new(0),
                batch_calls: AtomicUsize::new(0),
            }
        }

        fn vector_for(&self, text: &str) -> Vec<f32> {
            let mut v = vec![0.0; self.dims];
            v[0] = text.len() as f32;
            v
        }

        fn total_calls(&self) -> usize {
            self.embed_calls.load(Ordering::SeqCst) + self.batch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        fn provider_type(&self) -> &str {
            "fake"
        }

        fn model_name(&self) -> &str {
            "fake-model"
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.embed_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_marker.is_some_and(|m| text.contains(m)) {
                return Err(Error::Provider("marked text rejected".to_string()));
            }
            Ok(self.vector_for(text))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(marker) = self.fail_marker {
                if texts.iter().any(|t| t.contains(marker)) {
                    return Err(Error::Provider("batch contains marked text".to_string()));
                }
            }
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        }
    }

    fn chunking() -> ChunkingOptions {
        ChunkingOptions {
            strategy: ChunkStrategy::ParagraphAware,
            max_chunk_size: 40,
            overlap_size: 0,
            min_chunk_size: 0,
        }
    }

    fn batch() -> BatchOptions {
        BatchOptions {
            concurrency: 2,
            batch_size: Some(4),
            ..BatchOptions::default()
        }
    }

    fn sources() -> Vec<(String, String)> {
        vec![
            (
                "doc1".to_string(),
                "First paragraph of text.\n\nSecond paragraph of text.".to_string(),
            ),
            ("doc2".to_string(), "Another document entirely.".to_string()),
        ]
    }

    #[tokio::test]
    async fn test_generate_embedding_validates_dims() {
        let provider = FakeProvider::new(3);
        let result = generate_embedding("hello world", &provider).await.unwrap();
        assert_eq!(result.vector.len(), 3);
        assert_eq!(result.model, "fake-model");
        assert_eq!(result.tokens, Some(estimate_token_count("hello world")));

        // A provider returning a wrong-width vector is caught here.
        struct Narrow;
        #[async_trait]
        impl EmbeddingProvider for Narrow {
            fn provider_type(&self) -> &str {
                "narrow"
            }
            fn model_name(&self) -> &str {
                "narrow-model"
            }
            fn dims(&self) -> usize {
                4
            }
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(vec![1.0, 2.0])
            }
        }
        let err = generate_embedding("hello", &Narrow).await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 2 }));
    }

    #[tokio::test]
    async fn test_generates_all_chunks_grouped_by_source() {
        let provider = Arc::new(FakeProvider::new(2));
        let report = generate_embeddings(&sources(), provider.clone(), &chunking(), &batch(), None)
            .await
            .unwrap();

        assert!(report.errors.is_empty());
        assert_eq!(report.skipped, 0);
        assert_eq!(report.generated, 3);
        assert_eq!(report.embeddings["doc1"].len(), 2);
        assert_eq!(report.embeddings["doc2"].len(), 1);
        assert_eq!(report.embeddings["doc1"][0].chunk.index, 0);
        assert_eq!(report.embeddings["doc1"][1].chunk.index, 1);
    }

    #[tokio::test]
    async fn test_rerun_over_unchanged_sources_makes_no_calls() {
        let provider = Arc::new(FakeProvider::new(2));
        let first = generate_embeddings(&sources(), provider.clone(), &chunking(), &batch(), None)
            .await
            .unwrap();
        let existing: HashMap<String, ChunkedEmbedding> = first
            .embeddings
            .values()
            .flatten()
            .map(|e| (e.chunk.id.clone(), e.clone()))
            .collect();

        let calls_before = provider.total_calls();
        let second = generate_embeddings(
            &sources(),
            provider.clone(),
            &chunking(),
            &batch(),
            Some(&existing),
        )
        .await
        .unwrap();

        assert_eq!(provider.total_calls(), calls_before);
        assert_eq!(second.generated, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(second.embeddings["doc1"], first.embeddings["doc1"]);
        assert_eq!(second.embeddings["doc2"], first.embeddings["doc2"]);
    }

    #[tokio::test]
    async fn test_only_changed_chunk_is_regenerated() {
        let provider = Arc::new(FakeProvider::new(2));
        let mut srcs = sources();
        let first = generate_embeddings(&srcs, provider.clone(), &chunking(), &batch(), None)
            .await
            .unwrap();
        let existing: HashMap<String, ChunkedEmbedding> = first
            .embeddings
            .values()
            .flatten()
            .map(|e| (e.chunk.id.clone(), e.clone()))
            .collect();

        // Edit the second paragraph of doc1 only.
        srcs[0].1 = "First paragraph of text.\n\nSecond paragraph was edited.".to_string();
        let second = generate_embeddings(
            &srcs,
            provider.clone(),
            &chunking(),
            &batch(),
            Some(&existing),
        )
        .await
        .unwrap();

        assert_eq!(second.generated, 1);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.embeddings["doc1"][0], first.embeddings["doc1"][0]);
        assert_ne!(second.embeddings["doc1"][1], first.embeddings["doc1"][1]);
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_abort_siblings() {
        let mut provider = FakeProvider::new(2);
        provider.fail_marker = Some("Second");
        let provider = Arc::new(provider);

        let report = generate_embeddings(&sources(), provider, &chunking(), &batch(), None)
            .await
            .unwrap();

        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].input.text.contains("Second"));
        assert_eq!(report.generated, 2);
        assert_eq!(report.embeddings["doc1"].len(), 1);
        assert_eq!(report.embeddings["doc2"].len(), 1);
    }

    #[tokio::test]
    async fn test_removed_source_chunks_are_garbage_collected() {
        let provider = Arc::new(FakeProvider::new(2));
        let first = generate_embeddings(&sources(), provider.clone(), &chunking(), &batch(), None)
            .await
            .unwrap();
        let existing: HashMap<String, ChunkedEmbedding> = first
            .embeddings
            .values()
            .flatten()
            .map(|e| (e.chunk.id.clone(), e.clone()))
            .collect();

        // Only doc2 remains; doc1's embeddings are orphans.
        let remaining = vec![sources().remove(1)];
        let second = generate_embeddings(
            &remaining,
            provider,
            &chunking(),
            &batch(),
            Some(&existing),
        )
        .await
        .unwrap();

        assert!(!second.embeddings.contains_key("doc1"));
        assert_eq!(second.embeddings["doc2"].len(), 1);
        assert_eq!(second.skipped, 1);
    }
}
