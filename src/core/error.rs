//! Errors observable by callers of the checkpointer

use std::time::Duration;

use thiserror::Error;

use super::version::Version;
use crate::automaton::AutomatonError;
use crate::gate::GateError;

/// Errors returned by checkpoint operations and their outcomes
///
/// `Clone` so that a single failure can resolve both the rotation and the
/// snapshot outcome of a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointError {
    /// A log rotation is already in flight
    #[error("changelog rotation is already in progress")]
    RotationInProgress,
    /// A snapshot build is already in flight
    #[error("snapshot build is already in progress")]
    SnapshotInProgress,
    /// Nothing has been logged into the current segment yet
    #[error("cannot build snapshot at {version}: no records in the current segment")]
    EmptyLog { version: Version },
    /// The current segment is the last one a version can address
    #[error("cannot rotate changelog at {version}: segment ids exhausted")]
    SegmentIdsExhausted { version: Version },
    /// The quorum flush barrier failed
    #[error("quorum flush failed")]
    QuorumFlushFailed(#[source] GateError),
    /// The quorum flush barrier did not resolve in time
    #[error("quorum flush did not complete within {0:?}")]
    QuorumFlushTimedOut(Duration),
    /// Mutations were logged after the gate had been suspended
    #[error("logged version moved from {expected} to {actual} while logging was suspended")]
    LogPositionMoved { expected: Version, actual: Version },
    /// The local snapshot build failed
    #[error("error building local snapshot")]
    LocalSnapshot(#[source] AutomatonError),
    /// The local log rotation failed
    #[error("error rotating local changelog")]
    LocalRotation(#[source] AutomatonError),
    /// Not enough replicas rotated their logs
    #[error("not enough successful changelog rotation replies: {achieved} out of {total} (quorum {required})")]
    InsufficientQuorum {
        achieved: usize,
        required: usize,
        total: usize,
    },
    /// The session finished without resolving this outcome
    #[error("checkpoint session was abandoned")]
    Abandoned,
    /// The checkpointer is no longer running
    #[error("checkpointer is stopped")]
    Stopped,
}

impl CheckpointError {
    /// Precondition violations are caller bugs and must not be retried
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            CheckpointError::RotationInProgress
                | CheckpointError::SnapshotInProgress
                | CheckpointError::EmptyLog { .. }
                | CheckpointError::SegmentIdsExhausted { .. }
        )
    }
}
