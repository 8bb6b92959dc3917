//! Automaton abstraction consumed by the checkpointer
//!
//! The automaton owns the replicated state and the local changelog.
//! The checkpointer only needs its logged position and the ability to
//! snapshot the state and rotate the changelog locally.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::version::Version;

/// Snapshot checksum, opaque to the checkpointer
pub type Checksum = u64;

/// Result of a successful local snapshot build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotParams {
    /// Version the snapshot was taken at
    pub version: Version,
    /// Checksum of the snapshot contents
    pub checksum: Checksum,
}

/// Future completing a snapshot whose state has already been captured
pub type SnapshotFuture = BoxFuture<'static, Result<SnapshotParams, AutomatonError>>;

/// Errors reported by local automaton operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AutomatonError {
    #[error("snapshot build failed: {0}")]
    Snapshot(String),
    #[error("log rotation failed: {0}")]
    Rotation(String),
}

/// Automaton facade - local state machine operations used for checkpoints
///
/// Implementations must be thread-safe: the logged position is read from
/// the automaton context while snapshot and rotation futures are driven
/// from checkpoint session tasks.
#[async_trait]
pub trait AutomatonFacade: Send + Sync {
    /// Position of the last durably logged mutation
    fn logged_position(&self) -> Version;

    /// Build a snapshot of the local state at the logged position
    ///
    /// The state is captured when this is called, so a rotation started
    /// afterwards cannot leak into the snapshot; the returned future
    /// completes the build. With `read_only` set the automaton stops
    /// accepting mutations afterwards.
    fn build_local_snapshot(&self, read_only: bool) -> SnapshotFuture;

    /// Close the current changelog segment and open the next one
    async fn rotate_local_log(&self) -> Result<(), AutomatonError>;
}
