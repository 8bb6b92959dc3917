//! Quorum membership of the replica set
//!
//! Peers are identified by their index in the replica set, `0..total`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::transport::PeerChannel;

/// Index of a replica within the replica set
pub type PeerId = usize;

/// Replica set as seen by the leader of the current epoch
pub trait QuorumMembership: Send + Sync {
    /// Number of replicas, including self
    fn total_peer_count(&self) -> usize;

    /// Number of replicas (including self) needed to commit
    fn quorum_peer_count(&self) -> usize;

    /// This replica's id
    fn self_id(&self) -> PeerId;

    /// Channel to a peer, or None if the peer is currently unreachable
    fn channel_for(&self, peer_id: PeerId) -> Option<Arc<dyn PeerChannel>>;

    /// Ids of every other replica that currently has a channel
    fn reachable_peers(&self) -> Vec<(PeerId, Arc<dyn PeerChannel>)> {
        (0..self.total_peer_count())
            .filter(|&peer_id| peer_id != self.self_id())
            .filter_map(|peer_id| self.channel_for(peer_id).map(|channel| (peer_id, channel)))
            .collect()
    }
}

/// Membership over a fixed table of peer channels
pub struct StaticMembership {
    self_id: PeerId,
    total: usize,
    quorum: usize,
    channels: HashMap<PeerId, Arc<dyn PeerChannel>>,
}

impl StaticMembership {
    /// Create a membership of `total` replicas with a majority quorum
    /// Peers without an entry in `channels` are treated as unreachable
    pub fn new(self_id: PeerId, total: usize, channels: HashMap<PeerId, Arc<dyn PeerChannel>>) -> Self {
        Self {
            self_id,
            total,
            quorum: total / 2 + 1,
            channels,
        }
    }

    /// Override the quorum size
    pub fn with_quorum(mut self, quorum: usize) -> Self {
        self.quorum = quorum;
        self
    }
}

impl QuorumMembership for StaticMembership {
    fn total_peer_count(&self) -> usize {
        self.total
    }

    fn quorum_peer_count(&self) -> usize {
        self.quorum
    }

    fn self_id(&self) -> PeerId {
        self.self_id
    }

    fn channel_for(&self, peer_id: PeerId) -> Option<Arc<dyn PeerChannel>> {
        if peer_id == self.self_id {
            return None;
        }
        self.channels.get(&peer_id).cloned()
    }
}
