//! Block preallocator: lifecycle and request handoff.
//!
//! [`Allocator::new`] fills the pool synchronously and then starts the pool
//! engine. [`Allocator::get`] is a two-step handoff with the engine, and
//! [`Allocator::close`] stops the engine and deletes whatever is still
//! cached.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, Block, Lba, lbas};
use crate::config::PreallocConfig;
use crate::engine::{Channels, Engine, Remnant, Reply};
use crate::error::{Error, Result};
use crate::events::{EventBus, PreallocEvent};
use crate::stats::{Counters, PreallocStats};

/// Shared state behind every [`Allocator`] clone.
struct Shared<B: Backend> {
    name: Arc<str>,
    backend: Arc<B>,
    config: PreallocConfig,
    /// Lifecycle signal. Cancelled by `close`, by dropping the last handle,
    /// and optionally by a failed refill.
    cancel: CancellationToken,
    requests: mpsc::Sender<Reply<B::Block>>,
    inspect: mpsc::Sender<Reply<Vec<Lba>>>,
    returns: mpsc::UnboundedSender<B::Block>,
    engine: Mutex<Option<JoinHandle<Remnant<B::Block>>>>,
    counters: Arc<Counters>,
    events: Arc<EventBus>,
}

impl<B: Backend> Drop for Shared<B> {
    fn drop(&mut self) {
        if self.engine.get_mut().take().is_some() {
            self.cancel.cancel();
            tracing::warn!(
                pool = %self.name,
                "allocator dropped without close, cached blocks were not freed"
            );
        }
    }
}

/// Pool of preallocated blocks kept warm in the background.
///
/// Cloning is cheap; all clones share one pool.
pub struct Allocator<B: Backend> {
    inner: Arc<Shared<B>>,
}

impl<B: Backend> Clone for Allocator<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Allocator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Allocator")
            .field("name", &self.inner.name)
            .field("target_size", &self.inner.config.target_size)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<B: Backend> Allocator<B> {
    /// Fill a pool of `config.target_size` blocks and start replenishing it.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] for an invalid config and
    /// [`Error::Allocation`] if the backend cannot supply the initial fill.
    /// Nothing is started and nothing is retained on failure.
    pub async fn new(backend: Arc<B>, config: PreallocConfig) -> Result<Self> {
        Self::new_with_cancellation(backend, config, &CancellationToken::new()).await
    }

    /// Like [`new`](Self::new), but the initial fill is abandoned with
    /// [`Error::Cancelled`] when `cancel` fires.
    ///
    /// `cancel` only bounds construction; the allocator's own lifetime ends
    /// with [`close`](Self::close).
    pub async fn new_with_cancellation(
        backend: Arc<B>,
        config: PreallocConfig,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let name: Arc<str> = Arc::from(config.name.as_str());
        let target_size = config.target_size;

        let blocks = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            result = backend.alloc_blocks(target_size) => {
                result.map_err(|e| Error::allocation(target_size, e))?
            }
        };
        tracing::debug!(pool = %name, count = blocks.len(), "initial fill complete");

        let counters = Arc::new(Counters::default());
        counters.record_allocated(blocks.len());
        let events = Arc::new(EventBus::default());
        events.emit(PreallocEvent::Filled {
            count: blocks.len(),
        });

        let (requests, requests_rx) = mpsc::channel(config.request_backlog);
        let (inspect, inspect_rx) = mpsc::channel(1);
        let (returns, returns_rx) = mpsc::unbounded_channel();
        let lifecycle = CancellationToken::new();

        let engine = Engine::new(
            Arc::clone(&name),
            Arc::clone(&backend),
            target_size,
            config.close_on_refill_failure,
            blocks,
            Channels {
                requests: requests_rx,
                inspect: inspect_rx,
                returns: returns_rx,
            },
            lifecycle.clone(),
            Arc::clone(&counters),
            Arc::clone(&events),
        );
        let handle = tokio::spawn(engine.run());

        Ok(Self {
            inner: Arc::new(Shared {
                name,
                backend,
                config,
                cancel: lifecycle,
                requests,
                inspect,
                returns,
                engine: Mutex::new(Some(handle)),
                counters,
                events,
            }),
        })
    }

    /// Take a preallocated block.
    ///
    /// Waits until the engine hands over a block or the allocator closes,
    /// whichever happens first. Returns `None` once closed, unless the
    /// engine already sent this caller a block: a completed handoff wins
    /// over a later close. There is no timeout; race this against a timer
    /// for a bounded wait.
    pub async fn get(&self) -> Option<B::Block> {
        let inner = &*self.inner;
        let (reply, rx) = oneshot::channel();

        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return None,
            sent = inner.requests.send(reply) => sent.ok()?,
        }

        let mut pending = PendingReply { rx, inner };
        tokio::select! {
            biased;
            () = inner.cancel.cancelled() => pending.rx.try_recv().ok(),
            block = &mut pending.rx => block.ok(),
        }
    }

    /// Stop the engine and delete every block still cached.
    ///
    /// Deletion is best effort: a backend failure is logged and otherwise
    /// ignored. Blocks already handed out are not touched. Calling `close`
    /// again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let inner = &*self.inner;
        let handle = inner.engine.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };
        inner.cancel.cancel();

        let blocks = match handle.await {
            Ok(remnant) => remnant.into_blocks(&inner.counters),
            Err(e) => {
                tracing::error!(pool = %inner.name, error = %e, "pool engine task failed");
                Vec::new()
            }
        };
        inner.counters.set_cached(0);

        if !blocks.is_empty() {
            reclaim(&inner.name, &*inner.backend, &inner.events, &blocks).await;
            inner.backend.release_blocks(blocks);
        }

        inner.counters.mark_closed();
        inner.events.emit(PreallocEvent::Closed);
        tracing::debug!(pool = %inner.name, "allocator closed");
        Ok(())
    }

    /// Addresses of the cached blocks, front first.
    ///
    /// Returns `None` once the engine has stopped.
    pub async fn cached_lbas(&self) -> Option<Vec<Lba>> {
        let (reply, rx) = oneshot::channel();
        self.inner.inspect.send(reply).await.ok()?;
        rx.await.ok()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> PreallocStats {
        self.inner.counters.snapshot()
    }

    /// Subscribe to allocator events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PreallocEvent> {
        self.inner.events.subscribe()
    }

    /// Whether the allocator stopped serving (closed, or escalated refill
    /// failure).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Number of blocks the pool keeps cached.
    #[must_use]
    pub fn target_size(&self) -> usize {
        self.inner.config.target_size
    }

    /// The configuration this allocator was built with.
    #[must_use]
    pub fn config(&self) -> &PreallocConfig {
        &self.inner.config
    }
}

/// Delete `blocks` on the backend in one request. Failures are logged and
/// reported as events, never returned.
async fn reclaim<B: Backend>(name: &str, backend: &B, events: &EventBus, blocks: &[B::Block]) {
    let count = blocks.len();
    match backend.compare_and_delete(blocks).await {
        Ok(()) => {
            tracing::debug!(pool = %name, count, "freed cached blocks");
            events.emit(PreallocEvent::Reclaimed { count });
        }
        Err(e) => {
            let err = Error::reclaim(count, e);
            tracing::warn!(
                pool = %name,
                lbas = ?lbas(blocks),
                error = %err,
                "could not free cached blocks (ignored)"
            );
            events.emit(PreallocEvent::ReclaimFailed {
                count,
                error: err.to_string(),
            });
        }
    }
}

/// Reply endpoint of an in-flight `get`.
///
/// If the caller stops waiting after the engine already sent a block, the
/// block goes back to the engine. Once `close` has drained the pool, it is
/// deleted on the backend from a detached task instead.
struct PendingReply<'a, B: Backend> {
    rx: oneshot::Receiver<B::Block>,
    inner: &'a Shared<B>,
}

impl<B: Backend> Drop for PendingReply<'_, B> {
    fn drop(&mut self) {
        self.rx.close();
        let Ok(block) = self.rx.try_recv() else {
            return;
        };
        let Err(mpsc::error::SendError(block)) = self.inner.returns.send(block) else {
            return;
        };

        let inner = self.inner;
        inner.counters.record_unclaimed();
        let lba = block.lba();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::debug!(
                    pool = %inner.name,
                    %lba,
                    "allocator already closed, freeing unclaimed block"
                );
                let name = Arc::clone(&inner.name);
                let backend = Arc::clone(&inner.backend);
                let events = Arc::clone(&inner.events);
                runtime.spawn(async move {
                    let blocks = vec![block];
                    reclaim(&name, &*backend, &events, &blocks).await;
                    backend.release_blocks(blocks);
                });
            }
            Err(_) => {
                tracing::warn!(
                    pool = %inner.name,
                    %lba,
                    "no runtime to free unclaimed block, releasing handle only"
                );
                inner.backend.release_blocks(vec![block]);
            }
        }
    }
}
