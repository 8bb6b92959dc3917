//! Checkpoint configuration parameters

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for distributed snapshot building and log rotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Deadline for a follower to build its snapshot (default: 5min)
    #[serde(with = "duration_ms")]
    pub snapshot_build_timeout: Duration,
    /// Deadline for control RPCs such as remote log rotation (default: 15s)
    #[serde(with = "duration_ms")]
    pub control_rpc_timeout: Duration,
    /// Deadline for the quorum flush barrier (default: 1min)
    /// `None` waits for the barrier indefinitely
    #[serde(with = "option_duration_ms")]
    pub quorum_flush_timeout: Option<Duration>,
    /// Ask followers to build snapshots too (default: true)
    /// When disabled only the leader persists a snapshot
    pub enable_observer_persistence: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            snapshot_build_timeout: Duration::from_secs(5 * 60),
            control_rpc_timeout: Duration::from_secs(15),
            quorum_flush_timeout: Some(Duration::from_secs(60)),
            enable_observer_persistence: true,
        }
    }
}

impl CheckpointConfig {
    /// Create a new config with a custom follower snapshot deadline
    pub fn with_snapshot_build_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_build_timeout = timeout;
        self
    }

    /// Create a new config with a custom control RPC deadline
    pub fn with_control_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.control_rpc_timeout = timeout;
        self
    }

    /// Create a new config with a custom quorum flush deadline
    /// Pass `None` to wait for the barrier indefinitely
    pub fn with_quorum_flush_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.quorum_flush_timeout = timeout;
        self
    }

    /// Enable or disable snapshot building on followers
    pub fn with_observer_persistence(mut self, enabled: bool) -> Self {
        self.enable_observer_persistence = enabled;
        self
    }

    /// Parse a config from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
