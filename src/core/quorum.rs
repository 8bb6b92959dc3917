//! Reply bookkeeping for checkpoint sessions

use crate::automaton::Checksum;
use crate::membership::PeerId;

/// Rotation replies received by a session so far
#[derive(Debug, Clone)]
pub struct RotationTally {
    quorum: usize,
    local_replied: bool,
    local_succeeded: bool,
    remote_successes: usize,
}

impl RotationTally {
    /// `quorum` counts the local replica
    pub fn new(quorum: usize) -> Self {
        Self {
            quorum,
            local_replied: false,
            local_succeeded: false,
            remote_successes: 0,
        }
    }

    /// Count a follower that confirmed the rotation
    pub fn record_remote_success(&mut self) {
        self.remote_successes += 1;
    }

    /// Record the local rotation result; only the first call has effect
    /// Returns false if the local result was already recorded
    pub fn record_local(&mut self, succeeded: bool) -> bool {
        if self.local_replied {
            return false;
        }
        self.local_replied = true;
        self.local_succeeded = succeeded;
        true
    }

    /// Rotation is committed once the local replica has rotated and
    /// enough followers have joined it to form a quorum.
    ///
    /// The local rotation is required even if followers alone would make a
    /// quorum: resolving earlier would let new mutations be versioned in the
    /// old segment.
    pub fn is_committed(&self) -> bool {
        self.local_succeeded && self.remote_successes >= self.quorum.saturating_sub(1)
    }

    /// Replicas known to have rotated, including self
    pub fn achieved(&self) -> usize {
        self.remote_successes + usize::from(self.local_succeeded)
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn remote_successes(&self) -> usize {
        self.remote_successes
    }
}

/// Comparison of the snapshot checksums reported by the replicas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumReport {
    /// Replicas that reported a checksum
    pub success_count: usize,
    /// First reported checksum, by peer id
    pub canonical: Option<(PeerId, Checksum)>,
    /// Replicas whose checksum differs from the canonical one
    pub mismatched: Vec<(PeerId, Checksum)>,
}

impl ChecksumReport {
    pub fn has_mismatch(&self) -> bool {
        !self.mismatched.is_empty()
    }
}

/// Compare per-peer checksum slots against the first non-empty one
pub fn reconcile_checksums(slots: &[Option<Checksum>]) -> ChecksumReport {
    let mut report = ChecksumReport {
        success_count: 0,
        canonical: None,
        mismatched: Vec::new(),
    };

    for (peer_id, slot) in slots.iter().enumerate() {
        let Some(checksum) = *slot else {
            continue;
        };
        report.success_count += 1;
        match report.canonical {
            None => report.canonical = Some((peer_id, checksum)),
            Some((_, canonical)) if canonical != checksum => report.mismatched.push((peer_id, checksum)),
            Some(_) => {}
        }
    }

    report
}
