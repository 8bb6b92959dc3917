//! Single-assignment checkpoint outcomes
//!
//! Several concurrent replies race to resolve the same outcome; only the
//! first resolution is delivered, later ones are dropped.

use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::error::CheckpointError;

type OutcomeResult<T> = Result<T, CheckpointError>;

/// Write side of an outcome; the first `resolve` wins
pub struct OutcomeCell<T> {
    sender: Mutex<Option<oneshot::Sender<OutcomeResult<T>>>>,
}

impl<T> OutcomeCell<T> {
    /// Create a cell and the outcome future it resolves
    pub fn new() -> (Self, Outcome<T>) {
        let (tx, rx) = oneshot::channel();
        let cell = Self {
            sender: Mutex::new(Some(tx)),
        };
        (cell, Outcome { receiver: Some(rx) })
    }

    /// Resolve the outcome
    /// Returns false (and drops `result`) if it was already resolved
    pub fn resolve(&self, result: OutcomeResult<T>) -> bool {
        match self.sender.lock().take() {
            Some(sender) => {
                // The caller may have stopped waiting; the outcome still counts as resolved
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.sender.lock().is_none()
    }
}

/// Read side of an outcome, awaited by the caller
///
/// Resolves to [`CheckpointError::Abandoned`] if the session went away
/// without resolving it.
#[derive(Debug)]
pub struct Outcome<T> {
    receiver: Option<oneshot::Receiver<OutcomeResult<T>>>,
}

impl<T> Outcome<T> {
    /// Take the result if it is already available
    ///
    /// Returns None while the outcome is pending and after the result has
    /// been taken; awaiting a taken outcome yields [`CheckpointError::Abandoned`].
    pub fn try_take(&mut self) -> Option<OutcomeResult<T>> {
        let receiver = self.receiver.as_mut()?;
        let result = match receiver.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => Err(CheckpointError::Abandoned),
        };
        self.receiver = None;
        Some(result)
    }
}

impl<T> Future for Outcome<T> {
    type Output = OutcomeResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Poll::Ready(Err(CheckpointError::Abandoned));
        };
        let result = ready!(Pin::new(receiver).poll(cx)).unwrap_or(Err(CheckpointError::Abandoned));
        self.receiver = None;
        Poll::Ready(result)
    }
}
