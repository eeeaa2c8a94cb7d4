//! # Nebula Block Preallocation
//!
//! A warm pool of storage blocks in front of a block-oriented backend.
//! Allocating from the backend is slow, so [`Allocator`] keeps
//! `target_size` blocks cached and replenishes them from a single
//! background task. Callers take blocks with [`Allocator::get`]; once handed
//! out, a block belongs to the caller for good.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use nebula_prealloc::testing::MemoryBackend;
//! use nebula_prealloc::{Allocator, Block, PreallocConfig};
//!
//! # async fn demo() -> nebula_prealloc::Result<()> {
//! let backend = Arc::new(MemoryBackend::new());
//! let alloc = Allocator::new(backend, PreallocConfig::default()).await?;
//!
//! if let Some(block) = alloc.get().await {
//!     println!("got {}", block.lba());
//! }
//!
//! alloc.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod backend;
pub mod config;
mod engine;
pub mod error;
pub mod events;
pub mod stats;
pub mod testing;

pub use allocator::Allocator;
pub use backend::{Backend, Block, Lba, lbas};
pub use config::{DEFAULT_TARGET_SIZE, PreallocConfig};
pub use error::{Error, Result};
pub use events::{EventBus, PreallocEvent};
pub use stats::PreallocStats;
