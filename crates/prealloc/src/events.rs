//! Event broadcasting for preallocator observability.
//!
//! Provides [`PreallocEvent`] variants emitted by the pool engine and the
//! lifecycle operations, and an [`EventBus`] backed by
//! `tokio::sync::broadcast`.

use tokio::sync::broadcast;

use crate::backend::Lba;

// ---------------------------------------------------------------------------
// PreallocEvent
// ---------------------------------------------------------------------------

/// Events emitted while an allocator runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreallocEvent {
    /// The initial fill completed during construction.
    Filled {
        /// Number of blocks cached.
        count: usize,
    },
    /// A background refill appended blocks to the pool.
    Refilled {
        /// Number of blocks appended.
        count: usize,
    },
    /// A cached block was handed to a caller.
    Served {
        /// Address of the block.
        lba: Lba,
    },
    /// A block sent to a caller came back unread.
    Unclaimed {
        /// Address of the block.
        lba: Lba,
    },
    /// A background refill failed; the engine stopped.
    RefillFailed {
        /// Number of blocks requested.
        requested: usize,
        /// Human-readable error description.
        error: String,
    },
    /// Cached blocks were deleted on the backend at shutdown.
    Reclaimed {
        /// Number of blocks deleted.
        count: usize,
    },
    /// Deleting cached blocks at shutdown failed (ignored).
    ReclaimFailed {
        /// Number of blocks in the delete request.
        count: usize,
        /// Human-readable error description.
        error: String,
    },
    /// The allocator finished closing.
    Closed,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for preallocator events.
///
/// Emission is fire-and-forget: if no subscribers are listening or the
/// channel is full, events are dropped (no backpressure on the engine).
pub struct EventBus {
    sender: broadcast::Sender<PreallocEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    ///
    /// Subscribers that fall behind by more than `buffer_size` events
    /// receive a `Lagged` error and skip ahead.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: PreallocEvent) {
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PreallocEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.emit(PreallocEvent::Closed);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(PreallocEvent::Refilled { count: 5 });

        let event = rx.recv().await.expect("should receive event");
        assert_eq!(event, PreallocEvent::Refilled { count: 5 });
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(PreallocEvent::Served { lba: Lba(9) });

        assert_eq!(rx1.recv().await.unwrap(), PreallocEvent::Served { lba: Lba(9) });
        assert_eq!(rx2.recv().await.unwrap(), PreallocEvent::Served { lba: Lba(9) });
    }
}
