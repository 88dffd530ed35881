use crate::batch::CloseTrigger;
use crate::builder::BatcherBuilder;
use crate::engine::{Engine, Lane};
use crate::executor::BatchExecutor;
use crate::pending::Pending;
use batcher_core::{BatchError, BatchResult, BatcherConfig};
use std::sync::Arc;
use std::time::Duration;

/// Single-stream request batcher.
///
/// Callers submit one item at a time from any number of tasks or threads;
/// items are grouped into batches of at most `max_batch_size`, each batch is
/// closed by whichever comes first of the size trigger and the `max_wait`
/// timer, handed to the executor, and every caller receives the result for
/// its own item. Cloning is cheap and clones share the same batches.
pub struct Batcher<T, R> {
    engine: Arc<Engine<(), T, R>>,
    lane: Arc<Lane<T, R>>,
}

impl<T, R> Clone for Batcher<T, R> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            lane: Arc::clone(&self.lane),
        }
    }
}

impl<T, R> Batcher<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub fn builder() -> BatcherBuilder<(), T, R> {
        BatcherBuilder::new()
    }

    /// Build from a loaded configuration.
    pub fn new<E>(config: BatcherConfig, executor: E) -> BatchResult<Self>
    where
        E: BatchExecutor<T, R>,
    {
        Self::builder().config(config).executor(executor).build()
    }

    pub(crate) fn from_engine(engine: Arc<Engine<(), T, R>>) -> Self {
        Self {
            engine,
            lane: Arc::new(Lane::new()),
        }
    }

    /// Start hook: bind to the current tokio runtime. Idempotent.
    pub fn start(&self) -> BatchResult<()> {
        self.engine.start()
    }

    /// Add `item` to the open batch without waiting for its outcome.
    pub fn enqueue(&self, item: T) -> BatchResult<Pending<R>> {
        // The single lane is never retired.
        self.engine
            .enqueue(&self.lane, &(), item)
            .unwrap_or_else(|_| Err(BatchError::Shutdown))
    }

    /// Add `item` and wait for its individual result.
    pub async fn submit(&self, item: T) -> BatchResult<R> {
        self.enqueue(item)?.await
    }

    /// Add `item` and block the current thread until its result arrives.
    /// For callers outside the async runtime.
    pub fn submit_blocking(&self, item: T) -> BatchResult<R> {
        self.enqueue(item)?.wait()
    }

    /// Dispatch the open batch now, however many items it holds.
    pub fn flush(&self) {
        self.engine.flush_lane(&self.lane, &(), CloseTrigger::Flush);
    }

    /// Items accepted that have not received an outcome yet.
    pub fn pending(&self) -> usize {
        self.engine.pending()
    }

    pub fn len(&self) -> usize {
        self.pending()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    pub async fn join(&self, timeout: Duration) -> BatchResult<()> {
        self.engine.join(timeout).await
    }

    /// Stop hook. See [`KeyedBatcher::close`](crate::KeyedBatcher::close).
    pub async fn close(&self) -> BatchResult<()> {
        if !self.engine.mark_closed() {
            return Ok(());
        }
        self.engine
            .drain(vec![((), Arc::clone(&self.lane))])
            .await
    }

    pub fn is_started(&self) -> bool {
        self.engine.is_started()
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_closed()
    }

    pub fn config(&self) -> &BatcherConfig {
        self.engine.config()
    }
}
