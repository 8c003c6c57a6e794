//! Error taxonomy for the RAG runtime.
//!
//! Variants map to distinct caller policies:
//!
//! | Variant | Policy |
//! |---------|--------|
//! | [`Error::Config`] | Fatal, surfaced before any work starts, never retried |
//! | [`Error::DimensionMismatch`] | Fatal for the affected unit; indicates a provider/model misconfiguration, not a transient fault |
//! | [`Error::Provider`] | Isolated per item inside a batch; the batch continues |
//! | [`Error::Store`] | Propagated to the search/persistence caller |
//! | [`Error::Io`] | Fatal while loading configuration |
//!
//! Per-unit failures inside a batch are collected as
//! [`BatchError`](crate::queue::BatchError)s, never thrown up the stack.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors produced by the RAG runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad chunking, limiter, batch, or search parameters.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The provider returned a vector whose length does not match its
    /// declared dimensionality. Never silently truncated or padded.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A single provider call failed (network, timeout, provider-side).
    #[error("provider call failed: {0}")]
    Provider(String),

    /// The vector store rejected or failed a query/upsert.
    #[error("vector store error: {0}")]
    Store(String),

    /// Filesystem error while loading configuration.
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
