use batcher_core::{BatchError, BatchResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// The outcome of one submitted item, fulfilled exactly once by the batch it
/// landed in.
///
/// Dropping a `Pending` detaches the caller: the item is still processed, its
/// outcome is discarded. If the batcher goes away without producing an
/// outcome the future resolves to [`BatchError::Shutdown`] instead of hanging.
#[must_use = "a Pending does nothing unless awaited or waited on"]
#[derive(Debug)]
pub struct Pending<R> {
    rx: oneshot::Receiver<BatchResult<R>>,
}

impl<R> Pending<R> {
    pub(crate) fn new(rx: oneshot::Receiver<BatchResult<R>>) -> Self {
        Self { rx }
    }

    /// Block the current thread until the outcome arrives.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; await
    /// the `Pending` there instead.
    pub fn wait(self) -> BatchResult<R> {
        self.rx.blocking_recv().unwrap_or(Err(BatchError::Shutdown))
    }
}

impl<R> Future for Pending<R> {
    type Output = BatchResult<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(BatchError::Shutdown)))
    }
}
