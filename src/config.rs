//! TOML configuration for the pipeline.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration. [`load_config`] validates all invariants up front;
//! the typed sections convert into the runtime option structs via
//! [`Config::chunking_options`], [`Config::batch_options`], and
//! [`Config::search_options`].

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::chunk::{ChunkStrategy, ChunkingOptions};
use crate::error::{Error, Result};
use crate::progress::ProgressMode;
use crate::queue::BatchOptions;
use crate::rate_limit::RateLimiter;
use crate::search::SearchOptions;
use crate::store::{memory::InMemoryVectorStore, DistanceMetric};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub strategy: ChunkStrategy,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default)]
    pub overlap_size: usize,
    #[serde(default)]
    pub min_chunk_size: usize,
}

fn default_max_chunk_size() -> usize {
    2000
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::default(),
            max_chunk_size: default_max_chunk_size(),
            overlap_size: 0,
            min_chunk_size: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BatchConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Provider requests per minute.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub progress: ProgressMode,
}

fn default_batch_size() -> usize {
    10
}
fn default_rate_limit() -> u32 {
    100
}
fn default_concurrency() -> usize {
    4
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            rate_limit: default_rate_limit(),
            concurrency: default_concurrency(),
            progress: ProgressMode::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub metric: DistanceMetric,
}

fn default_k() -> usize {
    10
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            min_score: None,
            metric: DistanceMetric::default(),
        }
    }
}

impl Config {
    pub fn chunking_options(&self) -> ChunkingOptions {
        ChunkingOptions {
            strategy: self.chunking.strategy,
            max_chunk_size: self.chunking.max_chunk_size,
            overlap_size: self.chunking.overlap_size,
            min_chunk_size: self.chunking.min_chunk_size,
        }
    }

    /// Build queue options, including the shared rate limiter and, when
    /// progress is enabled, a callback feeding the configured reporter.
    pub fn batch_options(&self) -> Result<BatchOptions> {
        let limiter = Arc::new(RateLimiter::new(self.batch.rate_limit)?);
        let on_progress = match self.batch.progress {
            ProgressMode::Off => None,
            mode => {
                let reporter = mode.reporter();
                Some(Arc::new(move |p: &crate::queue::BatchProgress| {
                    reporter.report("embeddings", p);
                }) as crate::queue::ProgressFn)
            }
        };
        Ok(BatchOptions {
            concurrency: self.batch.concurrency,
            batch_size: Some(self.batch.batch_size),
            rate_limiter: Some(limiter),
            on_progress,
            cancel: None,
        })
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            k: self.search.k,
            min_score: self.search.min_score,
            filter: None,
        }
    }

    /// Build the in-memory store ranked by the configured
    /// `[search].metric`.
    ///
    /// Callers bringing their own [`VectorStore`](crate::store::VectorStore)
    /// backend must construct it with `self.search.metric` themselves.
    pub fn vector_store(&self) -> InMemoryVectorStore {
        InMemoryVectorStore::new(self.search.metric)
    }
}

/// Load and validate a TOML configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("failed to parse config file: {e}")))?;

    config.chunking_options().validate()?;

    if config.batch.batch_size == 0 {
        return Err(Error::Config("batch.batch_size must be > 0".to_string()));
    }
    if config.batch.concurrency == 0 {
        return Err(Error::Config("batch.concurrency must be > 0".to_string()));
    }
    if config.batch.rate_limit == 0 {
        return Err(Error::Config("batch.rate_limit must be > 0".to_string()));
    }
    if config.search.k == 0 {
        return Err(Error::Config("search.k must be >= 1".to_string()));
    }

    Ok(config)
}
