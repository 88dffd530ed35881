//! The user-supplied function that processes a whole batch.
//!
//! Executors are synchronous, like the inference providers they usually wrap,
//! and run on tokio's blocking pool so a slow batch never stalls submitters.
//! Closures with the right signature implement both traits.

use batcher_core::{ExecutorError, ItemError};
use std::sync::Arc;

/// One result per item, in the order the items were handed over, or a
/// failure for the batch as a whole.
pub type ExecutionResult<R> = Result<Vec<Result<R, ItemError>>, ExecutorError>;

/// Measures an item against `max_batch_bytes`.
pub type Weigher<T> = Arc<dyn Fn(&T) -> usize + Send + Sync>;

/// Executor for a single batch stream.
pub trait BatchExecutor<T, R>: Send + Sync + 'static {
    /// Process `items` and return exactly `items.len()` results, positionally.
    /// A result vector of any other length fails the whole batch.
    fn execute(&self, items: Vec<T>) -> ExecutionResult<R>;
}

impl<T, R, F> BatchExecutor<T, R> for F
where
    F: Fn(Vec<T>) -> ExecutionResult<R> + Send + Sync + 'static,
{
    fn execute(&self, items: Vec<T>) -> ExecutionResult<R> {
        self(items)
    }
}

/// Executor for per-key batching. Receives the key the batch was built for.
pub trait KeyedBatchExecutor<K, T, R>: Send + Sync + 'static {
    fn execute(&self, key: &K, items: Vec<T>) -> ExecutionResult<R>;
}

impl<K, T, R, F> KeyedBatchExecutor<K, T, R> for F
where
    F: Fn(&K, Vec<T>) -> ExecutionResult<R> + Send + Sync + 'static,
{
    fn execute(&self, key: &K, items: Vec<T>) -> ExecutionResult<R> {
        self(key, items)
    }
}

/// Runs a single-stream executor as the executor of the unit key.
pub(crate) struct SingleStream<E>(pub E);

impl<T, R, E> KeyedBatchExecutor<(), T, R> for SingleStream<E>
where
    E: BatchExecutor<T, R>,
{
    fn execute(&self, _key: &(), items: Vec<T>) -> ExecutionResult<R> {
        self.0.execute(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl BatchExecutor<u32, u32> for Doubler {
        fn execute(&self, items: Vec<u32>) -> ExecutionResult<u32> {
            Ok(items.into_iter().map(|i| Ok(i * 2)).collect())
        }
    }

    #[test]
    fn test_struct_executor_through_single_stream() {
        let executor = SingleStream(Doubler);
        let results = executor.execute(&(), vec![1, 2, 3]).unwrap();
        assert_eq!(results, vec![Ok(2), Ok(4), Ok(6)]);
    }

    #[test]
    fn test_closure_executors() {
        let single = |items: Vec<u32>| -> ExecutionResult<String> {
            Ok(items.into_iter().map(|i| Ok(i.to_string())).collect())
        };
        assert_eq!(
            BatchExecutor::execute(&single, vec![4]).unwrap(),
            vec![Ok("4".to_string())]
        );

        let keyed = |key: &String, items: Vec<u32>| -> ExecutionResult<String> {
            Ok(items.into_iter().map(|i| Ok(format!("{key}:{i}"))).collect())
        };
        assert_eq!(
            KeyedBatchExecutor::execute(&keyed, &"a".to_string(), vec![1]).unwrap(),
            vec![Ok("a:1".to_string())]
        );
    }
}
