use thiserror::Error;

pub type BatchResult<T> = Result<T, BatchError>;

/// Outcome errors delivered to callers through their per-item channel, plus
/// the construction and lifecycle failures of the batcher itself.
#[derive(Error, Debug, Clone)]
pub enum BatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Batch execution error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Item error: {0}")]
    Item(#[from] ItemError),

    #[error("Batcher is shut down")]
    Shutdown,

    #[error("Batcher has not been started")]
    NotStarted,

    #[error("Timed out waiting for batches to complete")]
    Timeout,
}

/// Failure of a whole batch. Every item of the batch receives a clone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("executor failed: {0}")]
    Failed(String),

    #[error("executor returned {got} results for {expected} items")]
    LengthMismatch { expected: usize, got: usize },

    #[error("executor panicked: {0}")]
    Panicked(String),
}

impl ExecutorError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutorError::Failed(message.into())
    }
}

impl From<anyhow::Error> for ExecutorError {
    fn from(err: anyhow::Error) -> Self {
        ExecutorError::Failed(format!("{err:#}"))
    }
}

/// Failure the executor reports for one item of an otherwise successful batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ItemError {
    message: String,
}

impl ItemError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl BatchError {
    /// True for the errors that mean the batcher stopped serving, as opposed
    /// to the executor rejecting work.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            BatchError::Shutdown | BatchError::NotStarted | BatchError::Timeout
        )
    }
}
