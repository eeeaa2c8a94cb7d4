//! Property tests for handout invariants.
//!
//! For any pool size and number of concurrent callers:
//! - no address is handed out twice
//! - after close, the backend keeps exactly the handed-out blocks
//! - close issues at most one delete request

use std::collections::BTreeSet;
use std::sync::Arc;

use nebula_prealloc::testing::MemoryBackend;
use nebula_prealloc::{Allocator, Block, PreallocConfig};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn handout_is_at_most_once(
        target_size in 1usize..8,
        callers in 1usize..40,
        backlog in 1usize..4,
    ) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();

        let (handed, live, deletes) = rt.block_on(async {
            let backend = Arc::new(MemoryBackend::new());
            let config = PreallocConfig::default()
                .with_target_size(target_size)
                .with_request_backlog(backlog);
            let alloc = Allocator::new(Arc::clone(&backend), config).await.unwrap();

            let tasks: Vec<_> = (0..callers)
                .map(|_| {
                    let alloc = alloc.clone();
                    tokio::spawn(async move { alloc.get().await.map(|b| b.lba()) })
                })
                .collect();

            let mut handed = Vec::new();
            for task in tasks {
                handed.push(task.await.unwrap().unwrap());
            }

            alloc.close().await.unwrap();
            (handed, backend.live(), backend.delete_calls())
        });

        let unique: BTreeSet<_> = handed.iter().copied().collect();
        prop_assert_eq!(unique.len(), handed.len());
        prop_assert_eq!(live, unique);
        prop_assert!(deletes.len() <= 1);
    }
}
