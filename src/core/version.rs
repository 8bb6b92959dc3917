//! Log positions in the replicated write-ahead log

use std::fmt;

use serde::{Deserialize, Serialize};

/// A point in the replicated log: the segment (changelog) id and the
/// number of records already written to that segment.
///
/// Versions are totally ordered by `(segment_id, record_id)`; the derived
/// `Ord` relies on the field order below.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Id of the log segment
    pub segment_id: u32,
    /// Record offset within the segment
    pub record_id: u32,
}

impl Version {
    pub fn new(segment_id: u32, record_id: u32) -> Self {
        Self { segment_id, record_id }
    }

    /// Pack into a single 64-bit revision (segment in the high half)
    pub fn to_revision(self) -> u64 {
        (u64::from(self.segment_id) << 32) | u64::from(self.record_id)
    }

    /// Inverse of [`Version::to_revision`]
    pub fn from_revision(revision: u64) -> Self {
        Self {
            segment_id: (revision >> 32) as u32,
            record_id: (revision & 0xFFFF_FFFF) as u32,
        }
    }

    /// First position of the segment that follows this one
    /// None once segment ids are exhausted
    pub fn rotate(self) -> Option<Self> {
        Some(Self {
            segment_id: self.segment_id.checked_add(1)?,
            record_id: 0,
        })
    }

    /// Position after `count` more records in the same segment
    /// None if the segment cannot hold that many records
    pub fn advance(self, count: u32) -> Option<Self> {
        Some(Self {
            segment_id: self.segment_id,
            record_id: self.record_id.checked_add(count)?,
        })
    }

    /// True if no record has been written to the current segment yet
    pub fn is_segment_empty(self) -> bool {
        self.record_id == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment_id, self.record_id)
    }
}
