pub mod config;
pub mod counter;
pub mod error;

pub use config::BatcherConfig;
pub use counter::AtomicCounter;
pub use error::{BatchError, BatchResult, ExecutorError, ItemError};
