//! Enqueue cost must not grow with the batch size limit.

use batcher_engine::Batcher;
use std::time::{Duration, Instant};

const ITEMS: u64 = 20_000;

async fn enqueue_cost(max_batch_size: usize) -> Duration {
    let batcher = Batcher::builder()
        .max_batch_size(max_batch_size)
        .max_wait(Duration::from_secs(1))
        .executor_fn(|items: Vec<u64>| Ok(items.into_iter().map(|_| Ok(())).collect()))
        .build()
        .unwrap();

    let start = Instant::now();
    for i in 0..ITEMS {
        drop(batcher.enqueue(i).unwrap());
    }
    let elapsed = start.elapsed();

    batcher.close().await.unwrap();
    elapsed / ITEMS as u32
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_enqueue_cost_independent_of_batch_size() {
    // Warm up allocator and runtime.
    enqueue_cost(1000).await;

    let small = enqueue_cost(10).await;
    let large = enqueue_cost(100_000).await;

    assert!(
        large <= small * 5 + Duration::from_micros(5),
        "per-item enqueue cost grew with batch size: {small:?} -> {large:?}"
    );
}
