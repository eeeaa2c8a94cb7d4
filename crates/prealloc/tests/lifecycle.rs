//! Construction and shutdown behaviour.
//!
//! Verifies:
//! 1. Construction fills the pool with distinct blocks, or fails leaving
//!    nothing behind
//! 2. Close deletes exactly the cached blocks in one request
//! 3. Reclaim failures are swallowed and close still completes
//! 4. Close abandons an in-flight refill

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use nebula_prealloc::testing::MemoryBackend;
use nebula_prealloc::{Allocator, Block, Error, Lba, PreallocConfig, PreallocEvent};
use pretty_assertions::assert_eq;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn config(target_size: usize) -> PreallocConfig {
    PreallocConfig::default()
        .with_name("lifecycle")
        .with_target_size(target_size)
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn construct_fills_pool_with_distinct_blocks() {
    let backend = Arc::new(MemoryBackend::new());
    let alloc = Allocator::new(Arc::clone(&backend), PreallocConfig::default())
        .await
        .unwrap();

    let cached = alloc.cached_lbas().await.unwrap();
    assert_eq!(cached.len(), 32);
    assert_eq!(cached.iter().collect::<BTreeSet<_>>().len(), 32);
    assert_eq!(cached, (0..32).map(Lba).collect::<Vec<_>>());

    let stats = alloc.stats();
    assert_eq!(stats.cached, 32);
    assert_eq!(stats.allocated, 32);
    assert_eq!(backend.alloc_calls(), vec![32]);

    alloc.close().await.unwrap();
}

#[tokio::test]
async fn construct_failure_leaves_no_residue() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail_next_alloc();

    let err = Allocator::new(Arc::clone(&backend), config(8))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Allocation { requested: 8, .. }));
    assert!(err.is_retryable());

    // No engine was started, so nothing tries to refill.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(backend.alloc_calls(), vec![8]);
    assert!(backend.live().is_empty());
    assert!(backend.delete_calls().is_empty());
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_reclaims_only_cached_blocks() {
    let backend = Arc::new(MemoryBackend::new());
    let alloc = Allocator::new(Arc::clone(&backend), config(4)).await.unwrap();

    let a = alloc.get().await.unwrap();
    let b = alloc.get().await.unwrap();
    eventually(|| alloc.stats().cached == 4).await;
    let cached = alloc.cached_lbas().await.unwrap();

    alloc.close().await.unwrap();

    assert_eq!(backend.delete_calls(), vec![cached]);
    assert_eq!(backend.live(), BTreeSet::from([a.lba(), b.lba()]));
    assert_eq!(backend.released(), 4);
    assert_eq!(alloc.stats().cached, 0);
}

#[tokio::test]
async fn reclaim_failure_is_ignored() {
    let backend = Arc::new(MemoryBackend::new());
    let alloc = Allocator::new(Arc::clone(&backend), config(3)).await.unwrap();
    let mut events = alloc.subscribe();
    backend.fail_next_delete();

    alloc.close().await.unwrap();

    assert_eq!(backend.delete_calls().len(), 1);
    // Nothing was deleted, but the handles were still released.
    assert_eq!(backend.live().len(), 3);
    assert_eq!(backend.released(), 3);
    assert!(matches!(
        events.recv().await.unwrap(),
        PreallocEvent::ReclaimFailed { count: 3, .. }
    ));
    assert_eq!(events.recv().await.unwrap(), PreallocEvent::Closed);
}

#[tokio::test]
async fn close_abandons_inflight_refill() {
    let backend = Arc::new(MemoryBackend::new());
    let alloc = Allocator::new(Arc::clone(&backend), config(1)).await.unwrap();
    backend.hold_allocs();

    let block = alloc.get().await.unwrap();
    eventually(|| backend.alloc_calls().len() == 2).await;

    tokio::time::timeout(Duration::from_secs(1), alloc.close())
        .await
        .expect("close must not wait for the backend")
        .unwrap();

    // The pool was empty when the refill was abandoned.
    assert!(backend.delete_calls().is_empty());
    assert_eq!(backend.live(), BTreeSet::from([block.lba()]));
}

#[tokio::test]
async fn close_emits_reclaimed_then_closed() {
    let backend = Arc::new(MemoryBackend::new());
    let alloc = Allocator::new(Arc::clone(&backend), config(2)).await.unwrap();
    let mut events = alloc.subscribe();

    alloc.close().await.unwrap();

    assert_eq!(
        events.recv().await.unwrap(),
        PreallocEvent::Reclaimed { count: 2 }
    );
    assert_eq!(events.recv().await.unwrap(), PreallocEvent::Closed);
}

#[tokio::test]
async fn close_is_idempotent() {
    let backend = Arc::new(MemoryBackend::new());
    let alloc = Allocator::new(Arc::clone(&backend), config(2)).await.unwrap();
    let clone = alloc.clone();

    alloc.close().await.unwrap();
    clone.close().await.unwrap();

    assert_eq!(backend.delete_calls().len(), 1);
    assert!(clone.is_closed());
    assert!(clone.get().await.is_none());
}
