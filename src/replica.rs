//! Follower side of the checkpoint RPCs

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::automaton::AutomatonFacade;
use crate::core::epoch::EpochId;
use crate::transport::messages::{BuildSnapshotRequest, BuildSnapshotResponse, RotateLogRequest, RotateLogResponse};

/// Server side of the checkpoint RPCs
/// Errors are reported to the caller as opaque messages
#[async_trait]
pub trait ReplicaService: Send + Sync {
    async fn build_snapshot(&self, request: BuildSnapshotRequest) -> Result<BuildSnapshotResponse, String>;

    async fn rotate_log(&self, request: RotateLogRequest) -> Result<RotateLogResponse, String>;
}

/// Follower that serves checkpoint requests against its local automaton
pub struct FollowerReplica {
    epoch_id: EpochId,
    automaton: Arc<dyn AutomatonFacade>,
}

impl FollowerReplica {
    pub fn new(epoch_id: EpochId, automaton: Arc<dyn AutomatonFacade>) -> Self {
        Self { epoch_id, automaton }
    }

    fn check_epoch(&self, epoch_id: EpochId) -> Result<(), String> {
        if epoch_id != self.epoch_id {
            warn!(expected = %self.epoch_id, received = %epoch_id, "Rejecting request from another epoch");
            return Err(format!("invalid epoch: expected {}, received {}", self.epoch_id, epoch_id));
        }
        Ok(())
    }
}

#[async_trait]
impl ReplicaService for FollowerReplica {
    async fn build_snapshot(&self, request: BuildSnapshotRequest) -> Result<BuildSnapshotResponse, String> {
        self.check_epoch(request.epoch_id)?;

        // Rotation may overtake the snapshot request; an empty new segment
        // still holds the requested state
        let logged = self.automaton.logged_position();
        if logged != request.version && Some(logged) != request.version.rotate() {
            return Err(format!(
                "cannot build snapshot at {}: follower is at {}",
                request.version, logged
            ));
        }

        let params = self
            .automaton
            .build_local_snapshot(request.read_only)
            .await
            .map_err(|e| e.to_string())?;
        info!(version = %params.version, checksum = params.checksum, "Follower snapshot built");
        Ok(BuildSnapshotResponse {
            checksum: params.checksum,
        })
    }

    async fn rotate_log(&self, request: RotateLogRequest) -> Result<RotateLogResponse, String> {
        self.check_epoch(request.epoch_id)?;

        let logged = self.automaton.logged_position();
        if logged < request.version {
            debug!(%logged, requested = %request.version, "Postponing changelog rotation");
            return Ok(RotateLogResponse { rotated: false });
        }
        if Some(logged) == request.version.rotate() {
            // Already rotated by an earlier request for the same version
            return Ok(RotateLogResponse { rotated: true });
        }
        if logged != request.version {
            return Err(format!(
                "cannot rotate changelog at {}: follower is at {}",
                request.version, logged
            ));
        }

        self.automaton.rotate_local_log().await.map_err(|e| e.to_string())?;
        info!(version = %request.version, "Follower changelog rotated");
        Ok(RotateLogResponse { rotated: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automaton::MemoryAutomaton;
    use crate::core::version::Version;

    fn follower_at(version: Version) -> (FollowerReplica, Arc<MemoryAutomaton>) {
        let automaton = Arc::new(MemoryAutomaton::at(version));
        (FollowerReplica::new(EpochId(3), automaton.clone()), automaton)
    }

    #[tokio::test]
    async fn test_rotates_at_requested_version() {
        let (follower, automaton) = follower_at(Version::new(2, 5));
        let request = RotateLogRequest {
            epoch_id: EpochId(3),
            version: Version::new(2, 5),
        };

        assert_eq!(follower.rotate_log(request.clone()).await, Ok(RotateLogResponse { rotated: true }));
        assert_eq!(automaton.logged_position(), Version::new(3, 0));

        // A repeated request is acknowledged without rotating twice
        assert_eq!(follower.rotate_log(request).await, Ok(RotateLogResponse { rotated: true }));
        assert_eq!(automaton.rotations(), 1);
    }

    #[tokio::test]
    async fn test_lagging_follower_postpones_rotation() {
        let (follower, automaton) = follower_at(Version::new(2, 3));
        let request = RotateLogRequest {
            epoch_id: EpochId(3),
            version: Version::new(2, 5),
        };

        assert_eq!(follower.rotate_log(request).await, Ok(RotateLogResponse { rotated: false }));
        assert_eq!(automaton.rotations(), 0);
    }

    #[tokio::test]
    async fn test_stale_epoch_is_rejected() {
        let (follower, automaton) = follower_at(Version::new(2, 5));
        let request = RotateLogRequest {
            epoch_id: EpochId(2),
            version: Version::new(2, 5),
        };

        assert!(follower.rotate_log(request).await.is_err());
        assert_eq!(automaton.rotations(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_reports_checksum() {
        let (follower, automaton) = follower_at(Version::new(1, 0));
        automaton.apply("set a 1");

        let request = BuildSnapshotRequest {
            epoch_id: EpochId(3),
            version: Version::new(1, 1),
            read_only: true,
        };
        let response = follower.build_snapshot(request).await.unwrap();

        assert_eq!(response.checksum, automaton.checksum());
        assert!(automaton.is_read_only());
    }

    #[tokio::test]
    async fn test_snapshot_after_overtaking_rotation() {
        let (follower, automaton) = follower_at(Version::new(1, 0));
        automaton.apply("set a 1");
        let expected = automaton.checksum();

        let rotate = RotateLogRequest {
            epoch_id: EpochId(3),
            version: Version::new(1, 1),
        };
        follower.rotate_log(rotate).await.unwrap();

        let request = BuildSnapshotRequest {
            epoch_id: EpochId(3),
            version: Version::new(1, 1),
            read_only: false,
        };
        assert_eq!(follower.build_snapshot(request).await.unwrap().checksum, expected);
    }

    #[tokio::test]
    async fn test_snapshot_at_wrong_version_fails() {
        let (follower, automaton) = follower_at(Version::new(1, 2));
        let request = BuildSnapshotRequest {
            epoch_id: EpochId(3),
            version: Version::new(1, 4),
            read_only: false,
        };

        assert!(follower.build_snapshot(request).await.is_err());
        assert_eq!(automaton.snapshots_built(), 0);
    }
}
