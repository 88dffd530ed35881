//! Per-batch lifecycle.
//!
//! A batch moves `Open -> Closing -> Dispatched -> Done` and never skips a
//! state. The `Open -> Closing` step is a compare-and-swap, so when the size
//! trigger and the timer race for the same batch exactly one of them wins and
//! the other observes `Closing` and does nothing.

use batcher_core::BatchResult;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BatchState {
    Open = 0,
    Closing = 1,
    Dispatched = 2,
    Done = 3,
}

impl BatchState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BatchState::Open,
            1 => BatchState::Closing,
            2 => BatchState::Dispatched,
            _ => BatchState::Done,
        }
    }

    /// The only state this one may move to.
    pub fn next(self) -> Option<BatchState> {
        match self {
            BatchState::Open => Some(BatchState::Closing),
            BatchState::Closing => Some(BatchState::Dispatched),
            BatchState::Dispatched => Some(BatchState::Done),
            BatchState::Done => None,
        }
    }
}

/// What closed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseTrigger {
    Size,
    Bytes,
    Timer,
    Flush,
    Shutdown,
}

impl CloseTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseTrigger::Size => "size",
            CloseTrigger::Bytes => "bytes",
            CloseTrigger::Timer => "timer",
            CloseTrigger::Flush => "flush",
            CloseTrigger::Shutdown => "shutdown",
        }
    }
}

/// Identity and state of one batch, shared by its timer and dispatch task.
#[derive(Debug)]
pub struct BatchTicket {
    id: u64,
    created_at: Instant,
    state: AtomicU8,
}

impl BatchTicket {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            state: AtomicU8::new(BatchState::Open as u8),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn state(&self) -> BatchState {
        BatchState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Stop accepting items. Returns false if another trigger got there first.
    pub fn try_close(&self) -> bool {
        self.advance(BatchState::Open)
    }

    pub fn mark_dispatched(&self) -> bool {
        self.advance(BatchState::Closing)
    }

    pub fn mark_done(&self) -> bool {
        self.advance(BatchState::Dispatched)
    }

    fn advance(&self, from: BatchState) -> bool {
        let Some(to) = from.next() else {
            return false;
        };
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// A submitted item and the channel its outcome goes back through.
pub(crate) struct Entry<T, R> {
    pub item: T,
    pub tx: oneshot::Sender<BatchResult<R>>,
}

/// The batch currently accepting items for one lane.
pub(crate) struct OpenBatch<T, R> {
    pub ticket: Arc<BatchTicket>,
    pub entries: Vec<Entry<T, R>>,
    pub weight: usize,
    pub timer: Option<AbortHandle>,
}

impl<T, R> OpenBatch<T, R> {
    pub fn new(id: u64, capacity: usize) -> Self {
        Self {
            ticket: Arc::new(BatchTicket::new(id)),
            entries: Vec::with_capacity(capacity),
            weight: 0,
            timer: None,
        }
    }
}

/// A batch that has left the lane and is headed for the executor.
pub(crate) struct ClosedBatch<T, R> {
    pub ticket: Arc<BatchTicket>,
    pub entries: Vec<Entry<T, R>>,
    pub trigger: CloseTrigger,
}
