//! Error types for the windowed loader
//!
//! Configuration problems surface synchronously from the constructors. Every
//! other error is raised on a background thread, marshalled through one of the
//! bounded queues, and returned from the epoch iterator on the caller's thread.

use thiserror::Error;

/// Primary error type for all loader operations
#[derive(Debug, Error)]
pub enum LoaderError {
    // ========== Construction ==========
    /// Contradictory or invalid construction parameters
    #[error("Invalid loader configuration: {reason}")]
    Configuration { reason: String },

    // ========== Runtime ==========
    /// Remote count or fetch failed for a partition
    #[error("Query failed for partition {partition}: {source:#}")]
    Query {
        partition: String,
        #[source]
        source: anyhow::Error,
    },

    /// Stacking windows into a batch failed
    #[error("Failed to stack windows into a batch: {source:#}")]
    Stack {
        #[source]
        source: anyhow::Error,
    },

    /// Iteration was released while partitions or batches were still pending
    #[error("Iteration cancelled after {batches_emitted} batches with work remaining")]
    Cancelled { batches_emitted: usize },

    /// A worker thread panicked, could not be spawned, or broke the queue protocol
    #[error("Internal loader error: {message}")]
    Internal { message: String },
}

impl LoaderError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        LoaderError::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        LoaderError::Internal {
            message: message.into(),
        }
    }

    /// Returns true for errors raised before any thread was started
    pub fn is_configuration(&self) -> bool {
        matches!(self, LoaderError::Configuration { .. })
    }

    /// Returns true if the epoch ended because it was released early
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LoaderError::Cancelled { .. })
    }
}

/// Result type alias for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;
