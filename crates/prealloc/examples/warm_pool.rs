//! Warm pool example
//!
//! A backend that takes 20ms per allocation call, fronted by a preallocator.
//! Gets served from the pool return immediately while the engine refills in
//! the background.
//!
//! Run with `RUST_LOG=nebula_prealloc=debug` to see the engine at work.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use nebula_prealloc::{Allocator, Backend, Block, Lba, PreallocConfig};

/// Block handle of the simulated device.
#[derive(Debug)]
struct DeviceBlock(Lba);

impl Block for DeviceBlock {
    fn lba(&self) -> Lba {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
#[error("device unavailable")]
struct DeviceError;

/// Device with a fixed allocation latency.
struct SlowDevice {
    next: AtomicU64,
    latency: Duration,
}

impl Backend for SlowDevice {
    type Block = DeviceBlock;
    type Error = DeviceError;

    async fn alloc_blocks(&self, count: usize) -> Result<Vec<DeviceBlock>, DeviceError> {
        tokio::time::sleep(self.latency).await;
        let first = self.next.fetch_add(count as u64, Ordering::Relaxed);
        Ok((first..first + count as u64).map(|n| DeviceBlock(Lba(n))).collect())
    }

    async fn compare_and_delete(&self, blocks: &[DeviceBlock]) -> Result<(), DeviceError> {
        println!("  device: deleting {} unused blocks", blocks.len());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Warm Block Pool Example ===\n");

    let device = Arc::new(SlowDevice {
        next: AtomicU64::new(0),
        latency: Duration::from_millis(20),
    });

    let start = Instant::now();
    let direct = device.alloc_blocks(1).await?;
    println!("direct allocation of {} took {:?}", direct[0].lba(), start.elapsed());

    let config = PreallocConfig::default()
        .with_name("device-0")
        .with_target_size(8);
    let alloc = Allocator::new(Arc::clone(&device), config).await?;
    println!("pool filled: {:?}\n", alloc.stats());

    for round in 0..3 {
        let start = Instant::now();
        let mut taken = Vec::new();
        for _ in 0..4 {
            if let Some(block) = alloc.get().await {
                taken.push(block.lba());
            }
        }
        println!("round {round}: got {taken:?} in {:?}", start.elapsed());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    println!("\nbefore close: {:?}", alloc.stats());
    alloc.close().await?;
    println!("after close:  {:?}", alloc.stats());

    Ok(())
}
