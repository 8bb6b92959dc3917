//! Peer channel abstraction for checkpoint RPCs

use async_trait::async_trait;
use thiserror::Error;

use super::messages::{BuildSnapshotRequest, BuildSnapshotResponse, RotateLogRequest, RotateLogResponse};

/// Channel to a single peer replica
#[async_trait]
pub trait PeerChannel: Send + Sync {
    /// Send a BuildSnapshot RPC to the peer
    async fn build_snapshot(&self, request: BuildSnapshotRequest) -> Result<BuildSnapshotResponse, TransportError>;

    /// Send a RotateLog RPC to the peer
    async fn rotate_log(&self, request: RotateLogRequest) -> Result<RotateLogResponse, TransportError>;
}

/// Errors that can occur during transport operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection to the peer failed
    #[error("connection to peer failed")]
    ConnectionFailed,
    /// Request timed out
    #[error("request timed out")]
    Timeout,
    /// The peer received the request but failed to serve it
    #[error("peer replied with error: {0}")]
    Remote(String),
}
