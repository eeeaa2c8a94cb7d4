//! Pool engine: the single task that owns the cached blocks.
//!
//! Every mutation of the pool happens inside [`Engine::step`]. Callers reach
//! the pool only through channels:
//!
//! - `requests`: a caller offers a private `oneshot::Sender` and waits on it.
//!   The engine reads requests only while the pool is non-empty.
//! - `inspect`: read-only snapshots of cached addresses.
//! - `returns`: blocks delivered to a caller that went away before reading
//!   them. They go back to the front of the pool.
//!
//! Each step picks one ready event. When a refill is due and a request is
//! waiting, either may win; there is no fairness between them.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, Block, Lba, lbas};
use crate::events::{EventBus, PreallocEvent};
use crate::stats::Counters;

/// Reply endpoint of a pending `get`.
pub(crate) type Reply<T> = oneshot::Sender<T>;

/// Receiving ends of the engine's channels.
pub(crate) struct Channels<T> {
    pub(crate) requests: mpsc::Receiver<Reply<T>>,
    pub(crate) inspect: mpsc::Receiver<Reply<Vec<Lba>>>,
    pub(crate) returns: mpsc::UnboundedReceiver<T>,
}

/// What is left when the engine stops.
///
/// Ownership of the remaining blocks moves back to whoever awaits the
/// engine task, so teardown never races with the loop.
pub(crate) struct Remnant<T> {
    blocks: Vec<T>,
    returns: mpsc::UnboundedReceiver<T>,
    // Kept open so callers that already queued a request keep waiting
    // (instead of failing) until the allocator is closed.
    _requests: mpsc::Receiver<Reply<T>>,
}

impl<T> Remnant<T> {
    /// All blocks still owned by the pool, including returned blocks the
    /// engine never got to process.
    ///
    /// Closes the return channel: blocks that come back after this are no
    /// longer the pool's to reclaim.
    pub(crate) fn into_blocks(mut self, counters: &Counters) -> Vec<T> {
        self.returns.close();
        while let Ok(block) = self.returns.try_recv() {
            counters.record_unclaimed();
            self.blocks.push(block);
        }
        self.blocks
    }
}

pub(crate) struct Engine<B: Backend> {
    name: Arc<str>,
    backend: Arc<B>,
    target_size: usize,
    close_on_refill_failure: bool,
    /// Cached blocks, served from the front.
    blocks: VecDeque<B::Block>,
    /// Returned blocks that did not fit while the pool was full.
    spare: Vec<B::Block>,
    channels: Channels<B::Block>,
    cancel: CancellationToken,
    counters: Arc<Counters>,
    events: Arc<EventBus>,
}

impl<B: Backend> Engine<B> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: Arc<str>,
        backend: Arc<B>,
        target_size: usize,
        close_on_refill_failure: bool,
        blocks: Vec<B::Block>,
        channels: Channels<B::Block>,
        cancel: CancellationToken,
        counters: Arc<Counters>,
        events: Arc<EventBus>,
    ) -> Self {
        let engine = Self {
            name,
            backend,
            target_size,
            close_on_refill_failure,
            blocks: blocks.into(),
            spare: Vec::new(),
            channels,
            cancel,
            counters,
            events,
        };
        engine.publish();
        engine
    }

    /// Run until cancelled or until a refill fails.
    pub(crate) async fn run(mut self) -> Remnant<B::Block> {
        tracing::debug!(pool = %self.name, cached = self.blocks.len(), "starting pool engine");
        while self.step().await {}
        tracing::debug!(pool = %self.name, cached = self.blocks.len(), "pool engine stopped");

        let Self {
            mut blocks,
            spare,
            channels,
            ..
        } = self;
        blocks.extend(spare);
        Remnant {
            blocks: blocks.into(),
            returns: channels.returns,
            _requests: channels.requests,
        }
    }

    /// Handle one event. Returns `false` when the engine must stop.
    pub(crate) async fn step(&mut self) -> bool {
        let refill_due = self.blocks.len() < self.target_size;
        let can_serve = !self.blocks.is_empty();

        tokio::select! {
            () = self.cancel.cancelled() => false,

            () = std::future::ready(()), if refill_due => self.refill().await,

            Some(reply) = self.channels.requests.recv(), if can_serve => {
                self.serve(reply);
                true
            }

            Some(reply) = self.channels.inspect.recv() => {
                let _ = reply.send(lbas(&self.blocks));
                true
            }

            Some(block) = self.channels.returns.recv() => {
                self.take_back(block);
                true
            }
        }
    }

    /// Top the pool up to `target_size`.
    async fn refill(&mut self) -> bool {
        if let Some(block) = self.spare.pop() {
            self.blocks.push_front(block);
            self.publish();
            return true;
        }

        let count = self.target_size - self.blocks.len();
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                tracing::debug!(pool = %self.name, count, "refill abandoned on shutdown");
                return false;
            }
            result = self.backend.alloc_blocks(count) => result,
        };

        match result {
            Ok(blocks) => {
                let allocated = blocks.len();
                self.blocks.extend(blocks);
                self.counters.record_refill(allocated);
                self.publish();
                tracing::debug!(
                    pool = %self.name,
                    requested = count,
                    allocated,
                    cached = self.blocks.len(),
                    "refilled pool"
                );
                self.events.emit(PreallocEvent::Refilled { count: allocated });
                true
            }
            Err(e) => {
                tracing::error!(
                    pool = %self.name,
                    count,
                    error = %e,
                    "could not allocate blocks, refill stopped"
                );
                self.counters.mark_refill_failed();
                self.events.emit(PreallocEvent::RefillFailed {
                    requested: count,
                    error: e.to_string(),
                });
                if self.close_on_refill_failure {
                    self.cancel.cancel();
                }
                false
            }
        }
    }

    /// Hand the front block to a waiting caller.
    fn serve(&mut self, reply: Reply<B::Block>) {
        // Dropping the reply tells the caller the allocator is closed.
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(block) = self.blocks.pop_front() else {
            return;
        };

        let lba = block.lba();
        match reply.send(block) {
            Ok(()) => {
                self.counters.record_served();
                tracing::trace!(pool = %self.name, %lba, "served block");
                self.events.emit(PreallocEvent::Served { lba });
            }
            // The caller gave up before we got to it.
            Err(block) => self.blocks.push_front(block),
        }
        self.publish();
    }

    fn take_back(&mut self, block: B::Block) {
        let lba = block.lba();
        tracing::trace!(pool = %self.name, %lba, "block returned unclaimed");
        self.counters.record_unclaimed();
        self.events.emit(PreallocEvent::Unclaimed { lba });
        if self.blocks.len() < self.target_size {
            self.blocks.push_front(block);
            self.publish();
        } else {
            self.spare.push(block);
        }
    }

    fn publish(&self) {
        self.counters.set_cached(self.blocks.len());
    }
}
