//! Log-suspension gate abstraction
//!
//! The gate sits in front of the leader's mutation committer. A checkpoint
//! flushes everything already accepted, then suspends acceptance so that no
//! mutation is interleaved with the rotation.

use futures::future::BoxFuture;
use thiserror::Error;

/// Errors reported by the gate's quorum flush
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// Replicating the flushed mutations to a quorum failed
    #[error("quorum flush failed: {0}")]
    FlushFailed(String),
    /// The epoch ended before the flush completed
    #[error("epoch ended before quorum flush completed")]
    EpochEnded,
}

/// Future resolving once a quorum has persisted the flushed mutations
pub type QuorumFlushFuture = BoxFuture<'static, Result<(), GateError>>;

/// Log-suspension gate of the current epoch
pub trait LogGate: Send + Sync {
    /// Flush accepted mutations for replication
    /// Returns a future that resolves once a quorum has durably persisted them
    fn flush(&self) -> QuorumFlushFuture;

    /// Stop accepting new mutations
    fn suspend(&self);

    /// Start accepting new mutations again
    fn resume(&self);
}
