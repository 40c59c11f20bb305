//! Error types for brandpipe.
//!
//! Library crates use [`BrandPipeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum BrandPipeError {
    /// Malformed request, rejected before any job or run is created.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// Network/HTTP failure while fetching a crawl target.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// One extraction facet (text, images, metadata) failed.
    #[error("extraction failed for {facet}: {message}")]
    ExtractionPartial { facet: String, message: String },

    /// AI completion service error, timeout, or unusable response.
    #[error("generation failure: {0}")]
    Generation(String),

    /// A BFS dimension could not be computed.
    #[error("scoring failure: {0}")]
    Scoring(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// A bounded wait elapsed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Record missing, or outside the caller's brand scope.
    #[error("not found: {0}")]
    NotFound(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BrandPipeError>;

impl BrandPipeError {
    /// Create an invalid-input error from any displayable message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a partial extraction error for the named facet.
    pub fn extraction(facet: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ExtractionPartial {
            facet: facet.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a crawl job failing with this error should be re-queued.
    ///
    /// Invalid input and missing records never succeed on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidInput { .. } | Self::NotFound(_) | Self::Config { .. }
        )
    }
}
