#![allow(dead_code)]

use batcher_engine::ExecutionResult;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Records every batch handed to the executor.
#[derive(Clone, Default)]
pub struct Recorder {
    batches: Arc<Mutex<Vec<Vec<u64>>>>,
}

impl Recorder {
    pub fn batches(&self) -> Vec<Vec<u64>> {
        self.batches.lock().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// Executor that records the batch and doubles every item.
    pub fn doubling(&self) -> impl Fn(Vec<u64>) -> ExecutionResult<u64> + Send + Sync + 'static {
        let batches = Arc::clone(&self.batches);
        move |items: Vec<u64>| {
            batches.lock().push(items.clone());
            Ok(items.into_iter().map(|i| Ok(i * 2)).collect())
        }
    }

    /// Poll until at least `count` batches were executed.
    pub async fn wait_for_batches(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.batch_count() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("executor was not called in time");
    }
}

/// A latch the executor spins on, so tests can hold a batch in flight.
#[derive(Clone, Default)]
pub struct Gate {
    open: Arc<AtomicBool>,
}

impl Gate {
    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    pub fn wait(&self) {
        while !self.open.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
