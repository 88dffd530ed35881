use crate::batch::CloseTrigger;
use crate::builder::BatcherBuilder;
use crate::engine::{Engine, Lane};
use crate::pending::Pending;
use batcher_core::{BatchResult, BatcherConfig};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Batcher with an independent batch stream per key.
///
/// Each key gets its own open batch, size trigger and timer; the executor is
/// called with the key alongside the batch. All keys share the dispatch
/// concurrency limit and the lifecycle of the batcher.
///
/// A lane is kept for every key that has received an item, so the registry
/// grows with the number of distinct keys. Call
/// [`prune_idle`](Self::prune_idle) periodically when keys are short-lived.
pub struct KeyedBatcher<K, T, R> {
    engine: Arc<Engine<K, T, R>>,
    lanes: Arc<DashMap<K, Arc<Lane<T, R>>>>,
}

impl<K, T, R> Clone for KeyedBatcher<K, T, R> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            lanes: Arc::clone(&self.lanes),
        }
    }
}

impl<K, T, R> KeyedBatcher<K, T, R>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Send + 'static,
    R: Send + 'static,
{
    pub fn builder() -> BatcherBuilder<K, T, R> {
        BatcherBuilder::new()
    }

    pub(crate) fn from_engine(engine: Arc<Engine<K, T, R>>) -> Self {
        Self {
            engine,
            lanes: Arc::new(DashMap::new()),
        }
    }

    fn lane(&self, key: &K) -> Arc<Lane<T, R>> {
        if let Some(lane) = self.lanes.get(key) {
            return Arc::clone(lane.value());
        }
        let lane = self
            .lanes
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Lane::new()));
        Arc::clone(lane.value())
    }

    pub fn start(&self) -> BatchResult<()> {
        self.engine.start()
    }

    pub fn enqueue(&self, key: K, mut item: T) -> BatchResult<Pending<R>> {
        loop {
            let lane = self.lane(&key);
            match self.engine.enqueue(&lane, &key, item) {
                Ok(outcome) => return outcome,
                // Pruned between lookup and lock; the next lookup creates a
                // fresh lane.
                Err(returned) => item = returned,
            }
        }
    }

    pub async fn submit(&self, key: K, item: T) -> BatchResult<R> {
        self.enqueue(key, item)?.await
    }

    pub fn submit_blocking(&self, key: K, item: T) -> BatchResult<R> {
        self.enqueue(key, item)?.wait()
    }

    /// Dispatch the open batch of `key`, if there is one.
    pub fn flush_key(&self, key: &K) {
        let lane = self.lanes.get(key).map(|lane| Arc::clone(lane.value()));
        if let Some(lane) = lane {
            self.engine.flush_lane(&lane, key, CloseTrigger::Flush);
        }
    }

    /// Dispatch the open batch of every key.
    pub fn flush(&self) {
        for (key, lane) in self.snapshot() {
            self.engine.flush_lane(&lane, &key, CloseTrigger::Flush);
        }
    }

    /// Keys that currently hold a lane.
    pub fn key_count(&self) -> usize {
        self.lanes.len()
    }

    /// Remove the lanes of keys with no open batch, returning how many were
    /// removed. In-flight batches are unaffected; a later item for a pruned
    /// key starts a new lane.
    pub fn prune_idle(&self) -> usize {
        let mut pruned = 0;
        self.lanes.retain(|_, lane| {
            let retired = lane.retire_if_idle();
            pruned += usize::from(retired);
            !retired
        });
        pruned
    }

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

    /// Stop hook. Rejects new submissions with `Shutdown`, dispatches every
    /// open batch and waits up to `shutdown_timeout` for in-flight batches.
    /// If the wait times out, every item still pending is failed with
    /// `Shutdown` and `Timeout` is returned. Calling it again is a no-op.
    pub async fn close(&self) -> BatchResult<()> {
        if !self.engine.mark_closed() {
            return Ok(());
        }
        // Lanes created from here on only ever see a closed engine.
        self.engine.drain(self.snapshot()).await
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

    fn snapshot(&self) -> Vec<(K, Arc<Lane<T, R>>)> {
        self.lanes
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }
}
