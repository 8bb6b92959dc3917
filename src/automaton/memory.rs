//! In-memory automaton for testing
//!
//! Keeps applied mutations in a vec and derives snapshot checksums from
//! them, so replicas that applied the same mutations agree on the checksum.
//! Failures and latencies can be injected per operation.

use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;

use super::{AutomatonError, AutomatonFacade, Checksum, SnapshotFuture, SnapshotParams};
use crate::core::version::Version;

#[derive(Debug, Default)]
struct Inner {
    position: Version,
    mutations: Vec<String>,
    read_only: bool,
    snapshot_failure: Option<String>,
    rotation_failure: Option<String>,
    checksum_override: Option<Checksum>,
    snapshot_delay: Duration,
    rotation_delay: Duration,
    snapshots_built: usize,
    rotations: usize,
}

/// In-memory automaton implementation
#[derive(Debug, Default)]
pub struct MemoryAutomaton {
    inner: Mutex<Inner>,
}

impl MemoryAutomaton {
    /// Create an automaton at position 0:0 with no mutations
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an automaton positioned at the given version
    pub fn at(position: Version) -> Self {
        let automaton = Self::new();
        automaton.inner.lock().position = position;
        automaton
    }

    /// Log and apply a mutation, advancing the record offset
    /// Returns None without applying anything once the segment is full
    pub fn apply(&self, mutation: &str) -> Option<Version> {
        let mut inner = self.inner.lock();
        let position = inner.position.advance(1)?;
        inner.mutations.push(mutation.to_string());
        inner.position = position;
        Some(position)
    }

    /// Make subsequent snapshot builds fail with the given message
    pub fn fail_snapshots(&self, message: &str) {
        self.inner.lock().snapshot_failure = Some(message.to_string());
    }

    /// Make subsequent log rotations fail with the given message
    pub fn fail_rotations(&self, message: &str) {
        self.inner.lock().rotation_failure = Some(message.to_string());
    }

    /// Report this checksum instead of the computed one
    pub fn override_checksum(&self, checksum: Checksum) {
        self.inner.lock().checksum_override = Some(checksum);
    }

    /// Delay every snapshot build by the given duration
    pub fn set_snapshot_delay(&self, delay: Duration) {
        self.inner.lock().snapshot_delay = delay;
    }

    /// Delay every log rotation by the given duration
    pub fn set_rotation_delay(&self, delay: Duration) {
        self.inner.lock().rotation_delay = delay;
    }

    /// Number of snapshots built so far
    pub fn snapshots_built(&self) -> usize {
        self.inner.lock().snapshots_built
    }

    /// Number of successful log rotations so far
    pub fn rotations(&self) -> usize {
        self.inner.lock().rotations
    }

    /// Whether a read-only snapshot has been built
    pub fn is_read_only(&self) -> bool {
        self.inner.lock().read_only
    }

    /// Checksum of the currently applied mutations
    pub fn checksum(&self) -> Checksum {
        Self::compute_checksum(&self.inner.lock())
    }

    fn compute_checksum(inner: &Inner) -> Checksum {
        if let Some(checksum) = inner.checksum_override {
            return checksum;
        }
        let data = serde_json::to_vec(&inner.mutations).unwrap_or_default();
        u64::from(crc32fast::hash(&data))
    }
}

#[async_trait]
impl AutomatonFacade for MemoryAutomaton {
    fn logged_position(&self) -> Version {
        self.inner.lock().position
    }

    fn build_local_snapshot(&self, read_only: bool) -> SnapshotFuture {
        let mut inner = self.inner.lock();
        let result = match inner.snapshot_failure.clone() {
            Some(message) => Err(AutomatonError::Snapshot(message)),
            None => {
                inner.snapshots_built += 1;
                inner.read_only |= read_only;
                Ok(SnapshotParams {
                    version: inner.position,
                    checksum: Self::compute_checksum(&inner),
                })
            }
        };
        let delay = inner.snapshot_delay;

        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed()
    }

    async fn rotate_local_log(&self) -> Result<(), AutomatonError> {
        let delay = self.inner.lock().rotation_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock();
        if let Some(message) = &inner.rotation_failure {
            return Err(AutomatonError::Rotation(message.clone()));
        }
        let position = inner
            .position
            .rotate()
            .ok_or_else(|| AutomatonError::Rotation(format!("no segment after {}", inner.position)))?;
        inner.rotations += 1;
        inner.position = position;
        Ok(())
    }
}
