//! Leadership epoch context

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::gate::LogGate;
use crate::membership::QuorumMembership;

/// Identifier of a leadership epoch
///
/// Carried by every checkpoint request so followers can reject requests
/// sent by a stale leader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EpochId(pub u64);

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch-{}", self.0)
    }
}

/// Everything the checkpointer needs from the current leadership epoch
#[derive(Clone)]
pub struct EpochContext {
    pub epoch_id: EpochId,
    /// Replica set and peer channels of this epoch
    pub membership: Arc<dyn QuorumMembership>,
    /// Gate in front of this epoch's mutation committer
    pub gate: Arc<dyn LogGate>,
}

impl EpochContext {
    pub fn new(epoch_id: EpochId, membership: Arc<dyn QuorumMembership>, gate: Arc<dyn LogGate>) -> Self {
        Self {
            epoch_id,
            membership,
            gate,
        }
    }
}
