//! Concurrent request batching.
//!
//! Many callers submit single items; the engine groups them into bounded
//! batches, runs each batch through a user-supplied executor and routes every
//! per-item result back to the caller that submitted it.

pub mod batch;
pub mod batcher;
pub mod builder;
mod engine;
pub mod executor;
pub mod keyed;
pub mod pending;

pub use batch::{BatchState, CloseTrigger};
pub use batcher::Batcher;
pub use builder::BatcherBuilder;
pub use executor::{BatchExecutor, ExecutionResult, KeyedBatchExecutor, Weigher};
pub use keyed::KeyedBatcher;
pub use pending::Pending;

pub use batcher_core::{BatchError, BatchResult, BatcherConfig, ExecutorError, ItemError};
