//! In-memory backend for tests and demos.
//!
//! [`MemoryBackend`] hands out sequential addresses, records every call it
//! receives, and can be told to fail or to hold allocations until released.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::backend::{Backend, Block, Lba};

/// Block handle produced by [`MemoryBackend`].
#[derive(Debug, PartialEq, Eq)]
pub struct MemoryBlock {
    lba: Lba,
}

impl Block for MemoryBlock {
    fn lba(&self) -> Lba {
        self.lba
    }
}

/// Error reported by [`MemoryBackend`] fault injection.
#[derive(Debug, Clone, thiserror::Error)]
#[error("memory backend: injected {operation} failure")]
pub struct MemoryBackendError {
    /// The operation that failed.
    pub operation: &'static str,
}

#[derive(Debug, Default)]
struct State {
    next_lba: u64,
    live: BTreeSet<Lba>,
    alloc_calls: Vec<usize>,
    delete_calls: Vec<Vec<Lba>>,
    released: usize,
    fail_allocs: usize,
    fail_all_allocs: bool,
    fail_deletes: usize,
}

/// Backend that keeps blocks in memory.
#[derive(Debug)]
pub struct MemoryBackend {
    state: Mutex<State>,
    held: watch::Sender<bool>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create a backend whose first block gets address 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a backend whose first block gets address `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            state: Mutex::new(State {
                next_lba: first,
                ..State::default()
            }),
            held: watch::Sender::new(false),
        }
    }

    /// Fail the next allocation.
    pub fn fail_next_alloc(&self) {
        self.state.lock().fail_allocs += 1;
    }

    /// Fail every allocation until turned off.
    pub fn fail_all_allocs(&self, enabled: bool) {
        self.state.lock().fail_all_allocs = enabled;
    }

    /// Fail the next delete request.
    pub fn fail_next_delete(&self) {
        self.state.lock().fail_deletes += 1;
    }

    /// Make allocations wait until [`release_allocs`](Self::release_allocs).
    pub fn hold_allocs(&self) {
        self.held.send_replace(true);
    }

    /// Let held allocations complete.
    pub fn release_allocs(&self) {
        self.held.send_replace(false);
    }

    /// Block counts of every allocation request, in call order.
    pub fn alloc_calls(&self) -> Vec<usize> {
        self.state.lock().alloc_calls.clone()
    }

    /// Addresses of every delete request, in call order.
    pub fn delete_calls(&self) -> Vec<Vec<Lba>> {
        self.state.lock().delete_calls.clone()
    }

    /// Addresses allocated and not deleted.
    pub fn live(&self) -> BTreeSet<Lba> {
        self.state.lock().live.clone()
    }

    /// Number of local handles released.
    pub fn released(&self) -> usize {
        self.state.lock().released
    }
}

impl Backend for MemoryBackend {
    type Block = MemoryBlock;
    type Error = MemoryBackendError;

    async fn alloc_blocks(&self, count: usize) -> Result<Vec<MemoryBlock>, MemoryBackendError> {
        self.state.lock().alloc_calls.push(count);

        let mut held = self.held.subscribe();
        // The sender lives in `self`, so this only fails if we are gone.
        let _ = held.wait_for(|held| !*held).await;

        let mut state = self.state.lock();
        if state.fail_all_allocs || state.fail_allocs > 0 {
            state.fail_allocs = state.fail_allocs.saturating_sub(1);
            return Err(MemoryBackendError {
                operation: "allocate",
            });
        }

        let first = state.next_lba;
        state.next_lba += count as u64;
        let blocks: Vec<_> = (first..first + count as u64)
            .map(|lba| MemoryBlock { lba: Lba(lba) })
            .collect();
        state.live.extend(blocks.iter().map(Block::lba));
        Ok(blocks)
    }

    async fn compare_and_delete(&self, blocks: &[MemoryBlock]) -> Result<(), MemoryBackendError> {
        let mut state = self.state.lock();
        let lbas: Vec<Lba> = blocks.iter().map(Block::lba).collect();
        state.delete_calls.push(lbas.clone());
        if state.fail_deletes > 0 {
            state.fail_deletes -= 1;
            return Err(MemoryBackendError {
                operation: "delete",
            });
        }
        for lba in lbas {
            state.live.remove(&lba);
        }
        Ok(())
    }

    fn release_blocks(&self, blocks: Vec<MemoryBlock>) {
        self.state.lock().released += blocks.len();
    }
}
