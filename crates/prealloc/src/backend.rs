//! The storage backend consumed by the preallocator.
//!
//! The backend owns blocks; the allocator only borrows them between
//! allocation and handout. Three capabilities are needed: allocate a batch,
//! conditionally delete a batch, and release local handles.

use std::fmt;
use std::future::Future;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Logical block address assigned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Lba(pub u64);

impl Lba {
    /// The raw address value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Lba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lba:{}", self.0)
    }
}

impl From<u64> for Lba {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A block handle produced by a [`Backend`].
///
/// Holding a handle means holding exclusive use of the block. Handles
/// handed out by the allocator are never seen by it again.
///
/// Handles are borrowed across backend calls from spawned tasks, hence
/// `Sync`.
pub trait Block: Send + Sync + 'static {
    /// Logical address of this block.
    fn lba(&self) -> Lba;
}

/// Block-oriented storage backend.
///
/// Implementations are shared across allocators and other consumers; the
/// allocator never coordinates with them beyond the calls below.
pub trait Backend: Send + Sync + 'static {
    /// Block handle type.
    type Block: Block;

    /// Error reported by backend operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Allocate `count` fresh blocks.
    ///
    /// May take arbitrarily long. The allocator abandons the call by
    /// dropping the future when it shuts down.
    fn alloc_blocks(
        &self,
        count: usize,
    ) -> impl Future<Output = Result<Vec<Self::Block>, Self::Error>> + Send;

    /// Delete every block in `blocks` as one batched, conditional request.
    ///
    /// A block is deleted only if it is still in the state it was allocated
    /// in; the request is idempotent as long as nobody else modifies the
    /// blocks concurrently.
    fn compare_and_delete(
        &self,
        blocks: &[Self::Block],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Release local handles. No backend I/O.
    fn release_blocks(&self, blocks: Vec<Self::Block>) {
        drop(blocks);
    }
}

/// Addresses of `blocks`, in order.
pub fn lbas<'a, B: Block>(blocks: impl IntoIterator<Item = &'a B>) -> Vec<Lba> {
    blocks.into_iter().map(Block::lba).collect()
}
