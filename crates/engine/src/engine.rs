//! Shared batching engine behind [`Batcher`](crate::Batcher) and
//! [`KeyedBatcher`](crate::KeyedBatcher).
//!
//! Each batch stream is a [`Lane`]: a narrow mutex around the batch that is
//! currently open. The critical section covers appending an item, checking
//! the triggers, and swapping the lane empty when a batch closes. Executor
//! calls and result fan-out run on spawned tasks outside that lock, so batch
//! N executes while batch N+1 accumulates.

use crate::batch::{BatchTicket, ClosedBatch, CloseTrigger, Entry, OpenBatch};
use crate::executor::{ExecutionResult, KeyedBatchExecutor, Weigher};
use crate::pending::Pending;
use batcher_core::{AtomicCounter, BatchError, BatchResult, BatcherConfig, ExecutorError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch, Notify, Semaphore};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Upper bound on the capacity reserved up front for a new batch. Larger
/// batches grow geometrically, which keeps the append amortized O(1) without
/// reserving 100k slots for a batch that the timer closes at ten items.
const MAX_PREALLOCATED_ITEMS: usize = 4096;

/// One independent batch stream.
pub(crate) struct Lane<T, R> {
    slot: Mutex<LaneSlot<T, R>>,
}

struct LaneSlot<T, R> {
    open: Option<OpenBatch<T, R>>,
    /// Set once the lane has been removed from its registry. Submitters that
    /// still hold it must look the key up again.
    retired: bool,
}

impl<T, R> Lane<T, R> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(LaneSlot {
                open: None,
                retired: false,
            }),
        }
    }

    /// Retire the lane if it holds no open batch. Returns true if retired.
    pub fn retire_if_idle(&self) -> bool {
        let mut slot = self.slot.lock();
        if slot.open.is_none() {
            slot.retired = true;
        }
        slot.retired
    }
}

pub(crate) struct Engine<K, T, R> {
    config: BatcherConfig,
    executor: Arc<dyn KeyedBatchExecutor<K, T, R>>,
    /// Present only when `max_batch_bytes` is configured.
    weigher: Option<Weigher<T>>,
    runtime: OnceLock<Handle>,
    closed: AtomicBool,
    pending: AtomicCounter,
    drained: Notify,
    dispatch_permits: Semaphore,
    abort: watch::Sender<bool>,
    next_batch_id: AtomicU64,
    initial_capacity: usize,
}

impl<K, T, R> Engine<K, T, R>
where
    K: Clone + Send + Sync + 'static,
    T: Send + 'static,
    R: Send + 'static,
{
    pub fn new(
        config: BatcherConfig,
        executor: Arc<dyn KeyedBatchExecutor<K, T, R>>,
        weigher: Option<Weigher<T>>,
    ) -> Self {
        let (abort, _) = watch::channel(false);
        let weigher = config.max_batch_bytes.and(weigher);
        Self {
            initial_capacity: config.max_batch_size.min(MAX_PREALLOCATED_ITEMS),
            dispatch_permits: Semaphore::new(config.max_concurrent_dispatches),
            config,
            executor,
            weigher,
            runtime: OnceLock::new(),
            closed: AtomicBool::new(false),
            pending: AtomicCounter::new(),
            drained: Notify::new(),
            abort,
            next_batch_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// Bind to the tokio runtime of the caller. Idempotent.
    pub fn start(&self) -> BatchResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BatchError::Shutdown);
        }
        if self.runtime.get().is_some() {
            return Ok(());
        }

        let handle = Handle::try_current().map_err(|e| {
            BatchError::Config(format!("starting a batcher requires a tokio runtime: {e}"))
        })?;

        if self.runtime.set(handle).is_ok() {
            info!(
                max_batch_size = self.config.max_batch_size,
                max_wait_us = self.config.max_wait_us,
                max_concurrent_dispatches = self.config.max_concurrent_dispatches,
                max_batch_bytes = ?self.config.max_batch_bytes,
                "Batcher started"
            );
        }
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.runtime.get().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> usize {
        self.pending.read()
    }

    /// Append `item` to the lane's open batch, closing it if a trigger fires.
    /// Hands the item back untouched if the lane has been retired.
    pub fn enqueue(
        self: &Arc<Self>,
        lane: &Arc<Lane<T, R>>,
        key: &K,
        item: T,
    ) -> Result<BatchResult<Pending<R>>, T> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(Err(BatchError::Shutdown));
        }
        let Some(runtime) = self.runtime.get() else {
            return Ok(Err(BatchError::NotStarted));
        };

        let weight = self.weigher.as_ref().map_or(0, |weigh| weigh(&item));
        let (tx, rx) = oneshot::channel();

        let (displaced, filled) = {
            let mut guard = lane.slot.lock();
            if guard.retired {
                return Err(item);
            }
            // Re-checked under the lock so `close` cannot miss this item.
            if self.closed.load(Ordering::SeqCst) {
                return Ok(Err(BatchError::Shutdown));
            }
            let slot = &mut guard.open;

            let overflows = match (self.config.max_batch_bytes, slot.as_ref()) {
                (Some(limit), Some(open)) => {
                    !open.entries.is_empty() && open.weight.saturating_add(weight) > limit
                }
                _ => false,
            };
            let displaced = if overflows {
                self.close_slot(slot, CloseTrigger::Bytes)
            } else {
                None
            };

            let open = slot.get_or_insert_with(|| self.open_batch(runtime, lane, key));
            open.entries.push(Entry { item, tx });
            open.weight = open.weight.saturating_add(weight);
            let (len, total_weight) = (open.entries.len(), open.weight);
            self.pending.add(1);

            let filled = if len >= self.config.max_batch_size {
                self.close_slot(slot, CloseTrigger::Size)
            } else if self
                .config
                .max_batch_bytes
                .is_some_and(|limit| total_weight >= limit)
            {
                self.close_slot(slot, CloseTrigger::Bytes)
            } else {
                None
            };

            (displaced, filled)
        };

        for batch in [displaced, filled].into_iter().flatten() {
            self.spawn_dispatch(runtime, key.clone(), batch);
        }

        Ok(Ok(Pending::new(rx)))
    }

    /// Close the lane's open batch, if any, regardless of how full it is.
    pub fn flush_lane(self: &Arc<Self>, lane: &Arc<Lane<T, R>>, key: &K, trigger: CloseTrigger) {
        let Some(runtime) = self.runtime.get() else {
            return;
        };
        let closed = self.close_slot(&mut lane.slot.lock().open, trigger);
        if let Some(batch) = closed {
            self.spawn_dispatch(runtime, key.clone(), batch);
        }
    }

    /// Wait until every accepted item has received its outcome.
    /// A timeout too large to express as a deadline waits without one.
    pub async fn join(&self, timeout: Duration) -> BatchResult<()> {
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        loop {
            let drained = self.drained.notified();
            if self.pending.read() == 0 {
                return Ok(());
            }
            let Some(deadline) = deadline else {
                drained.await;
                continue;
            };
            if tokio::time::timeout_at(deadline, drained).await.is_err() {
                return if self.pending.read() == 0 {
                    Ok(())
                } else {
                    Err(BatchError::Timeout)
                };
            }
        }
    }

    /// Stop accepting items. Returns false if the engine was already closed.
    ///
    /// Must run before the lanes to drain are collected: once the flag is
    /// set, an enqueue into a lane created later is rejected under that
    /// lane's lock.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// Dispatch every open batch of `lanes` and wait for the in-flight ones.
    /// Items still pending after `shutdown_timeout` are failed with
    /// [`BatchError::Shutdown`].
    pub async fn drain(self: &Arc<Self>, lanes: Vec<(K, Arc<Lane<T, R>>)>) -> BatchResult<()> {
        info!(
            pending = self.pending.read(),
            lanes = lanes.len(),
            "Closing batcher"
        );

        if let Some(runtime) = self.runtime.get() {
            for (key, lane) in &lanes {
                let closed = self.close_slot(&mut lane.slot.lock().open, CloseTrigger::Shutdown);
                if let Some(batch) = closed {
                    self.spawn_dispatch(runtime, key.clone(), batch);
                }
            }
        }

        let result = self.join(self.config.shutdown_timeout()).await;
        if result.is_err() {
            warn!(
                pending = self.pending.read(),
                timeout_ms = self.config.shutdown_timeout_ms,
                "Shutdown drain timed out, failing pending items"
            );
            self.abort.send_replace(true);
        } else {
            info!("Batcher closed");
        }
        result
    }

    fn open_batch(
        self: &Arc<Self>,
        runtime: &Handle,
        lane: &Arc<Lane<T, R>>,
        key: &K,
    ) -> OpenBatch<T, R> {
        let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let mut batch = OpenBatch::new(id, self.initial_capacity);

        let engine = Arc::clone(self);
        let lane = Arc::clone(lane);
        let key = key.clone();
        let ticket = Arc::clone(&batch.ticket);
        let wait = self.config.max_wait();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(wait).await;
            let closed = {
                let mut guard = lane.slot.lock();
                let slot = &mut guard.open;
                let current = slot
                    .as_ref()
                    .is_some_and(|open| Arc::ptr_eq(&open.ticket, &ticket));
                if current {
                    engine.close_slot(slot, CloseTrigger::Timer)
                } else {
                    None
                }
            };
            if let Some(batch) = closed {
                if let Some(runtime) = engine.runtime.get() {
                    engine.spawn_dispatch(runtime, key, batch);
                }
            }
        });
        batch.timer = Some(timer.abort_handle());
        batch
    }

    /// Take the open batch out of the lane. Must be called with the lane
    /// locked; the ticket's `Open -> Closing` swap decides the winner.
    fn close_slot(
        &self,
        slot: &mut Option<OpenBatch<T, R>>,
        trigger: CloseTrigger,
    ) -> Option<ClosedBatch<T, R>> {
        if !slot.as_ref()?.ticket.try_close() {
            return None;
        }
        let open = slot.take()?;
        if trigger != CloseTrigger::Timer {
            if let Some(timer) = &open.timer {
                timer.abort();
            }
        }
        Some(ClosedBatch {
            ticket: open.ticket,
            entries: open.entries,
            trigger,
        })
    }

    fn spawn_dispatch(self: &Arc<Self>, runtime: &Handle, key: K, batch: ClosedBatch<T, R>) {
        debug!(
            batch_id = batch.ticket.id(),
            size = batch.entries.len(),
            trigger = batch.trigger.as_str(),
            "Batch closed"
        );
        runtime.spawn(Arc::clone(self).dispatch(key, batch));
    }

    async fn dispatch(self: Arc<Self>, key: K, batch: ClosedBatch<T, R>) {
        let ClosedBatch {
            ticket, entries, ..
        } = batch;
        let size = entries.len();
        if size == 0 {
            ticket.mark_dispatched();
            ticket.mark_done();
            return;
        }

        let mut items = Vec::with_capacity(size);
        let mut waiters = Vec::with_capacity(size);
        for entry in entries {
            items.push(entry.item);
            waiters.push(entry.tx);
        }

        let mut abort = self.abort.subscribe();
        let outcome = tokio::select! {
            biased;
            _ = abort.wait_for(|aborted| *aborted) => None,
            outcome = self.execute(key, &ticket, items) => Some(outcome),
        };

        match outcome {
            Some(outcome) => {
                let succeeded = outcome.is_ok();
                fan_out(waiters, outcome);
                ticket.mark_done();
                debug!(
                    batch_id = ticket.id(),
                    size,
                    succeeded,
                    elapsed_us = ticket.created_at().elapsed().as_micros() as u64,
                    "Batch completed"
                );
            }
            None => {
                for tx in waiters {
                    let _ = tx.send(Err(BatchError::Shutdown));
                }
                // Still Closing if the batch never got a dispatch permit.
                ticket.mark_dispatched();
                ticket.mark_done();
            }
        }

        if self.pending.sub(size) == 0 {
            self.drained.notify_waiters();
        }
    }

    async fn execute(&self, key: K, ticket: &BatchTicket, items: Vec<T>) -> ExecutionResult<R> {
        let _permit = self
            .dispatch_permits
            .acquire()
            .await
            .map_err(|_| ExecutorError::failed("dispatch permits closed"))?;
        ticket.mark_dispatched();

        let executor = Arc::clone(&self.executor);
        tokio::task::spawn_blocking(move || executor.execute(&key, items))
            .await
            .unwrap_or_else(|err| Err(ExecutorError::Panicked(panic_message(err))))
    }
}

/// Deliver one outcome per waiter. A batch-level failure, or a result vector
/// that cannot be matched to the items, reaches every waiter of the batch.
pub(crate) fn fan_out<R>(
    waiters: Vec<oneshot::Sender<BatchResult<R>>>,
    outcome: ExecutionResult<R>,
) {
    let err = match outcome {
        Ok(results) if results.len() == waiters.len() => {
            for (tx, result) in waiters.into_iter().zip(results) {
                // A dropped receiver means the caller detached.
                let _ = tx.send(result.map_err(BatchError::Item));
            }
            return;
        }
        Ok(results) => ExecutorError::LengthMismatch {
            expected: waiters.len(),
            got: results.len(),
        },
        Err(err) => err,
    };

    for tx in waiters {
        let _ = tx.send(Err(BatchError::Executor(err.clone())));
    }
}

fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "executor task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
