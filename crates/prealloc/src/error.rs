//! Error types for block preallocation
use thiserror::Error;

/// Result type for preallocator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed backend error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the preallocator.
///
/// Only construction can fail from the caller's point of view. Refill and
/// reclaim failures are logged and reported through events; `get` signals
/// a closed allocator with `None`.
#[derive(Error, Debug)]
pub enum Error {
    /// Allocator configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// The backend could not supply blocks
    #[error("Could not allocate {requested} blocks: {source}")]
    Allocation {
        /// Number of blocks requested
        requested: usize,
        /// The backend error
        #[source]
        source: BoxError,
    },

    /// The backend could not delete cached blocks
    #[error("Could not free {count} cached blocks: {source}")]
    Reclaim {
        /// Number of blocks in the delete request
        count: usize,
        /// The backend error
        #[source]
        source: BoxError,
    },

    /// Construction was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an allocation error from a backend error
    pub fn allocation<E>(requested: usize, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Allocation {
            requested,
            source: Box::new(source),
        }
    }

    /// Create a reclaim error from a backend error
    pub fn reclaim<E>(count: usize, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Reclaim {
            count,
            source: Box::new(source),
        }
    }

    /// Check if retrying the operation may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Allocation { .. } | Self::Reclaim { .. } => true,
            Self::Configuration { .. } | Self::Cancelled => false,
        }
    }
}
