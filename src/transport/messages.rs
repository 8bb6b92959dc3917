//! Checkpoint RPC messages exchanged between leader and followers

use serde::{Deserialize, Serialize};

use crate::automaton::Checksum;
use crate::core::epoch::EpochId;
use crate::core::version::Version;

/// BuildSnapshot RPC arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSnapshotRequest {
    /// Leader's epoch
    pub epoch_id: EpochId,
    /// Version the snapshot must be taken at, sent as a packed revision
    #[serde(rename = "revision", with = "revision")]
    pub version: Version,
    /// Whether the follower must switch to read-only mode afterwards
    pub read_only: bool,
}

/// BuildSnapshot RPC result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSnapshotResponse {
    /// Checksum of the follower's snapshot
    pub checksum: Checksum,
}

/// RotateLog RPC arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateLogRequest {
    /// Leader's epoch
    pub epoch_id: EpochId,
    /// Version at which the current segment is closed, sent as a packed revision
    #[serde(rename = "revision", with = "revision")]
    pub version: Version,
}

/// RotateLog RPC result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotateLogResponse {
    /// False if the follower postponed the rotation
    pub rotated: bool,
}

mod revision {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::core::version::Version;

    pub fn serialize<S: Serializer>(value: &Version, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_revision())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Version, D::Error> {
        u64::deserialize(deserializer).map(Version::from_revision)
    }
}
