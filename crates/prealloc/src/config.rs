//! Preallocator configuration

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default number of blocks kept warm.
pub const DEFAULT_TARGET_SIZE: usize = 32;

/// Configuration for a block preallocator.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PreallocConfig {
    /// Name used in log fields and events.
    pub name: String,
    /// Number of blocks the pool keeps cached. Must be positive.
    pub target_size: usize,
    /// Capacity of the request queue between callers and the engine.
    pub request_backlog: usize,
    /// When a background refill fails, also close the allocator so that
    /// pending and future `get` calls return `None` instead of waiting for
    /// an explicit `close`.
    pub close_on_refill_failure: bool,
}

impl Default for PreallocConfig {
    fn default() -> Self {
        Self {
            name: "prealloc".to_string(),
            target_size: DEFAULT_TARGET_SIZE,
            request_backlog: 1,
            close_on_refill_failure: false,
        }
    }
}

impl PreallocConfig {
    /// Set the name used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the target pool size.
    pub fn with_target_size(mut self, target_size: usize) -> Self {
        self.target_size = target_size;
        self
    }

    /// Set the request queue capacity.
    pub fn with_request_backlog(mut self, request_backlog: usize) -> Self {
        self.request_backlog = request_backlog;
        self
    }

    /// Escalate background refill failures into a close.
    pub fn with_close_on_refill_failure(mut self, enabled: bool) -> Self {
        self.close_on_refill_failure = enabled;
        self
    }

    /// Validate the configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 {
            return Err(Error::configuration("target_size must be greater than 0"));
        }
        if self.request_backlog == 0 {
            return Err(Error::configuration(
                "request_backlog must be greater than 0",
            ));
        }
        Ok(())
    }
}
