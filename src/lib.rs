//! # ragkit
//!
//! Building blocks for retrieval-augmented generation pipelines: text
//! chunking, change-detected embedding generation, rate-limited batch
//! processing, and semantic vector search.
//!
//! The pieces compose into one flow:
//!
//! ```text
//! source text -> chunk -> change detection -> batch queue -> provider
//!                                                   |
//!                              vector store <- embeddings
//!                                    |
//!                       query -> semantic search -> ranked results
//! ```
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chunk`] | Split text into bounded, optionally overlapping chunks |
//! | [`change`] | Hash-based staleness detection and reconciliation |
//! | [`provider`] | The [`EmbeddingProvider`] backend seam |
//! | [`rate_limit`] | Token-bucket throttling of provider calls |
//! | [`queue`] | Bounded-concurrency batching with failure isolation |
//! | [`generator`] | The chunk-detect-embed-reconcile pipeline |
//! | [`store`] | The [`VectorStore`] seam plus an in-memory backend |
//! | [`search`] | Query embedding, ranking, and score normalization |
//! | [`config`] | TOML configuration for all of the above |
//! | [`progress`] | Progress reporting sinks for batch runs |
//!
//! Every layer degrades partially rather than totally: a failed chunk
//! costs one error entry, never the batch.

pub mod change;
pub mod chunk;
pub mod config;
pub mod error;
pub mod generator;
pub mod models;
pub mod progress;
pub mod provider;
pub mod queue;
pub mod rate_limit;
pub mod search;
pub mod store;

pub use change::{hash_text, merge_embeddings, should_regenerate, validate_dims};
pub use chunk::{chunk_text, ChunkStrategy, ChunkingOptions};
pub use config::{load_config, Config};
pub use error::{Error, Result};
pub use generator::{generate_embedding, generate_embeddings, GenerateReport};
pub use models::{ChunkedEmbedding, EmbeddingResult, TextChunk};
pub use progress::{ProgressMode, ProgressReporter};
pub use provider::EmbeddingProvider;
pub use queue::{
    batch_process, batch_process_grouped, BatchError, BatchOptions, BatchProcessResult,
    BatchProgress,
};
pub use rate_limit::RateLimiter;
pub use search::{find_similar, semantic_search, search_with_vector, SearchOptions, SearchResultItem};
pub use store::{memory::InMemoryVectorStore, DistanceMetric, VectorMatch, VectorStore};
