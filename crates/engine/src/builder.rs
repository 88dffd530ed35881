use crate::batcher::Batcher;
use crate::engine::Engine;
use crate::executor::{BatchExecutor, ExecutionResult, KeyedBatchExecutor, SingleStream, Weigher};
use crate::keyed::KeyedBatcher;
use batcher_core::{BatchError, BatchResult, BatcherConfig};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`Batcher`] (unit key) and [`KeyedBatcher`].
///
/// Starts from [`BatcherConfig::default`]. `build` fails with
/// [`BatchError::Config`] when the configuration is invalid or no executor was
/// given, and binds to the current tokio runtime unless
/// [`skip_auto_start`](Self::skip_auto_start) is set.
pub struct BatcherBuilder<K, T, R> {
    config: BatcherConfig,
    executor: Option<Arc<dyn KeyedBatchExecutor<K, T, R>>>,
    weigher: Option<Weigher<T>>,
}

impl<K, T, R> Default for BatcherBuilder<K, T, R> {
    fn default() -> Self {
        Self {
            config: BatcherConfig::default(),
            executor: None,
            weigher: None,
        }
    }
}

impl<K, T, R> BatcherBuilder<K, T, R>
where
    K: Clone + Send + Sync + 'static,
    T: Send + 'static,
    R: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every option with the values of `config`.
    pub fn config(mut self, config: BatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.config.max_batch_size = max_batch_size;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.config.max_wait_us = u64::try_from(max_wait.as_micros()).unwrap_or(u64::MAX);
        self
    }

    pub fn max_concurrent_dispatches(mut self, dispatches: usize) -> Self {
        self.config.max_concurrent_dispatches = dispatches;
        self
    }

    /// Close a batch before its total weight exceeds `limit`. Items are
    /// weighed with [`weigher`](Self::weigher), or `size_of::<T>()` if none
    /// is set.
    pub fn max_batch_bytes(mut self, limit: usize) -> Self {
        self.config.max_batch_bytes = Some(limit);
        self
    }

    pub fn weigher<F>(mut self, weigher: F) -> Self
    where
        F: Fn(&T) -> usize + Send + Sync + 'static,
    {
        self.weigher = Some(Arc::new(weigher));
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Build without binding to a runtime. Submissions are rejected with
    /// [`BatchError::NotStarted`] until `start` is called.
    pub fn skip_auto_start(mut self) -> Self {
        self.config.skip_auto_start = true;
        self
    }

    pub fn keyed_executor<E>(mut self, executor: E) -> Self
    where
        E: KeyedBatchExecutor<K, T, R>,
    {
        self.executor = Some(Arc::new(executor));
        self
    }

    pub fn build_keyed(self) -> BatchResult<KeyedBatcher<K, T, R>>
    where
        K: Eq + Hash,
    {
        Ok(KeyedBatcher::from_engine(self.into_engine()?))
    }

    fn into_engine(self) -> BatchResult<Arc<Engine<K, T, R>>> {
        self.config.validate()?;
        let executor = self
            .executor
            .ok_or_else(|| BatchError::Config("an executor is required".to_string()))?;

        let weigher = match (self.config.max_batch_bytes, self.weigher) {
            (Some(_), None) => Some(shallow_weigher::<T>()),
            (_, weigher) => weigher,
        };

        let skip_auto_start = self.config.skip_auto_start;
        let engine = Arc::new(Engine::new(self.config, executor, weigher));
        if !skip_auto_start {
            engine.start()?;
        }
        Ok(engine)
    }
}

impl<T, R> BatcherBuilder<(), T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub fn executor<E>(mut self, executor: E) -> Self
    where
        E: BatchExecutor<T, R>,
    {
        self.executor = Some(Arc::new(SingleStream(executor)));
        self
    }

    /// Same as [`executor`](Self::executor), but lets the closure's argument
    /// and return types be inferred.
    pub fn executor_fn<F>(self, executor: F) -> Self
    where
        F: Fn(Vec<T>) -> ExecutionResult<R> + Send + Sync + 'static,
    {
        self.executor(executor)
    }

    pub fn build(self) -> BatchResult<Batcher<T, R>> {
        Ok(Batcher::from_engine(self.into_engine()?))
    }
}

fn shallow_weigher<T: 'static>() -> Weigher<T> {
    Arc::new(|_: &T| std::mem::size_of::<T>())
}
