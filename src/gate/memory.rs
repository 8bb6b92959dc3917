//! In-memory log gate for testing
//!
//! Records every gate call in order and lets tests decide how the quorum
//! flush completes: immediately, with an error, or when released by hand.

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::{GateError, LogGate, QuorumFlushFuture};

/// Calls made against the gate, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    Flush,
    Suspend,
    Resume,
}

/// How the next quorum flush completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushBehavior {
    /// Resolve successfully right away
    Succeed,
    /// Resolve with the given error right away
    Fail(GateError),
    /// Stay pending until `release_flushes` is called
    Hold,
}

#[derive(Debug)]
struct Inner {
    behavior: FlushBehavior,
    suspended: bool,
    events: Vec<GateEvent>,
    held: Vec<oneshot::Sender<Result<(), GateError>>>,
    rejected: usize,
}

/// In-memory gate implementation
#[derive(Debug)]
pub struct MemoryGate {
    inner: Mutex<Inner>,
}

impl MemoryGate {
    /// Create a gate whose flushes succeed immediately
    pub fn new() -> Self {
        Self::with_behavior(FlushBehavior::Succeed)
    }

    pub fn with_behavior(behavior: FlushBehavior) -> Self {
        Self {
            inner: Mutex::new(Inner {
                behavior,
                suspended: false,
                events: Vec::new(),
                held: Vec::new(),
                rejected: 0,
            }),
        }
    }

    /// Change how subsequent flushes complete
    pub fn set_behavior(&self, behavior: FlushBehavior) {
        self.inner.lock().behavior = behavior;
    }

    /// Resolve every held flush with the given result
    pub fn release_flushes(&self, result: Result<(), GateError>) {
        let held = std::mem::take(&mut self.inner.lock().held);
        for sender in held {
            let _ = sender.send(result.clone());
        }
    }

    /// Offer a mutation; returns false (and counts a rejection) while suspended
    pub fn try_accept(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.suspended {
            inner.rejected += 1;
            return false;
        }
        true
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.lock().suspended
    }

    /// Number of mutations rejected while suspended
    pub fn rejected(&self) -> usize {
        self.inner.lock().rejected
    }

    /// All gate calls so far, in order
    pub fn events(&self) -> Vec<GateEvent> {
        self.inner.lock().events.clone()
    }
}

impl Default for MemoryGate {
    fn default() -> Self {
        Self::new()
    }
}

impl LogGate for MemoryGate {
    fn flush(&self) -> QuorumFlushFuture {
        let mut inner = self.inner.lock();
        inner.events.push(GateEvent::Flush);
        match inner.behavior.clone() {
            FlushBehavior::Succeed => futures::future::ready(Ok(())).boxed(),
            FlushBehavior::Fail(err) => futures::future::ready(Err(err)).boxed(),
            FlushBehavior::Hold => {
                let (tx, rx) = oneshot::channel();
                inner.held.push(tx);
                async move { rx.await.unwrap_or(Err(GateError::EpochEnded)) }.boxed()
            }
        }
    }

    fn suspend(&self) {
        let mut inner = self.inner.lock();
        inner.events.push(GateEvent::Suspend);
        inner.suspended = true;
    }

    fn resume(&self) {
        let mut inner = self.inner.lock();
        inner.events.push(GateEvent::Resume);
        inner.suspended = false;
    }
}
