//! Testing utilities for checkpoint integration tests
//!
//! Provides `ScriptedPeer` for hand-written follower replies and
//! `TestCluster` for a leader wired to in-memory followers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use crate::automaton::{Checksum, MemoryAutomaton};
use crate::core::{CheckpointConfig, CheckpointerHandle, CheckpointerServer, EpochContext, EpochId};
use crate::gate::MemoryGate;
use crate::membership::{PeerId, StaticMembership};
use crate::replica::FollowerReplica;
use crate::transport::inmemory::create_cluster;
use crate::transport::messages::{BuildSnapshotRequest, BuildSnapshotResponse, RotateLogRequest, RotateLogResponse};
use crate::transport::{PeerChannel, TransportError};

/// Install a fmt subscriber for test output; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition().await
}

/// How a scripted peer answers one kind of request
#[derive(Debug, Clone)]
pub enum Script<T> {
    /// Reply after the peer's delay
    Reply(Result<T, TransportError>),
    /// Never reply
    Hang,
}

#[derive(Debug)]
struct ScriptState {
    snapshot: Script<BuildSnapshotResponse>,
    rotation: Script<RotateLogResponse>,
    delay: Duration,
    snapshot_requests: Vec<BuildSnapshotRequest>,
    rotation_requests: Vec<RotateLogRequest>,
}

/// Peer channel answering from a script instead of a real follower
///
/// By default it builds snapshots with checksum 0 and confirms rotations.
#[derive(Debug)]
pub struct ScriptedPeer {
    state: Mutex<ScriptState>,
}

impl ScriptedPeer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScriptState {
                snapshot: Script::Reply(Ok(BuildSnapshotResponse { checksum: 0 })),
                rotation: Script::Reply(Ok(RotateLogResponse { rotated: true })),
                delay: Duration::ZERO,
                snapshot_requests: Vec::new(),
                rotation_requests: Vec::new(),
            }),
        }
    }

    /// Reply to snapshot requests with this checksum
    pub fn with_checksum(self, checksum: Checksum) -> Self {
        self.state.lock().snapshot = Script::Reply(Ok(BuildSnapshotResponse { checksum }));
        self
    }

    pub fn with_snapshot_script(self, script: Script<BuildSnapshotResponse>) -> Self {
        self.state.lock().snapshot = script;
        self
    }

    /// Reply to rotation requests with `rotated`
    pub fn with_rotated(self, rotated: bool) -> Self {
        self.state.lock().rotation = Script::Reply(Ok(RotateLogResponse { rotated }));
        self
    }

    pub fn with_rotation_script(self, script: Script<RotateLogResponse>) -> Self {
        self.state.lock().rotation = script;
        self
    }

    /// Wait this long before every reply
    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.lock().delay = delay;
        self
    }

    /// Stop replying to anything
    pub fn hang(self) -> Self {
        {
            let mut state = self.state.lock();
            state.snapshot = Script::Hang;
            state.rotation = Script::Hang;
        }
        self
    }

    pub fn snapshot_requests(&self) -> Vec<BuildSnapshotRequest> {
        self.state.lock().snapshot_requests.clone()
    }

    pub fn rotation_requests(&self) -> Vec<RotateLogRequest> {
        self.state.lock().rotation_requests.clone()
    }

    async fn play<T>(delay: Duration, script: Script<T>) -> Result<T, TransportError> {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match script {
            Script::Reply(reply) => reply,
            Script::Hang => futures::future::pending().await,
        }
    }
}

impl Default for ScriptedPeer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerChannel for ScriptedPeer {
    async fn build_snapshot(&self, request: BuildSnapshotRequest) -> Result<BuildSnapshotResponse, TransportError> {
        let (delay, script) = {
            let mut state = self.state.lock();
            state.snapshot_requests.push(request);
            (state.delay, state.snapshot.clone())
        };
        Self::play(delay, script).await
    }

    async fn rotate_log(&self, request: RotateLogRequest) -> Result<RotateLogResponse, TransportError> {
        let (delay, script) = {
            let mut state = self.state.lock();
            state.rotation_requests.push(request);
            (state.delay, state.rotation.clone())
        };
        Self::play(delay, script).await
    }
}

/// A leader checkpointer with in-memory followers
///
/// The leader is replica 0. Followers run `FollowerReplica` over their own
/// `MemoryAutomaton` and are reached through in-memory channels.
pub struct TestCluster {
    pub epoch_id: EpochId,
    pub handle: CheckpointerHandle,
    pub gate: Arc<MemoryGate>,
    /// Automatons by replica id; index 0 is the leader
    pub automatons: Vec<Arc<MemoryAutomaton>>,
}

impl TestCluster {
    /// Start a cluster of `size` replicas, all reachable
    pub async fn new(size: usize) -> Self {
        Self::with_config(size, &[], CheckpointConfig::default()).await
    }

    /// Start a cluster where the listed followers have no channel
    pub async fn with_config(size: usize, unreachable: &[PeerId], config: CheckpointConfig) -> Self {
        let epoch_id = EpochId(1);
        let peer_ids: Vec<PeerId> = (1..size).collect();
        let (channels, handles) = create_cluster(&peer_ids);

        let automatons: Vec<Arc<MemoryAutomaton>> = (0..size).map(|_| Arc::new(MemoryAutomaton::new())).collect();

        for (peer_id, handle) in handles {
            let follower = FollowerReplica::new(epoch_id, automatons[peer_id].clone());
            handle.serve(Arc::new(follower));
        }

        let channels: HashMap<PeerId, Arc<dyn PeerChannel>> = channels
            .into_iter()
            .filter(|(peer_id, _)| !unreachable.contains(peer_id))
            .map(|(peer_id, channel)| (peer_id, Arc::new(channel) as Arc<dyn PeerChannel>))
            .collect();
        let membership = Arc::new(StaticMembership::new(0, size, channels));

        let gate = Arc::new(MemoryGate::new());
        let epoch = EpochContext::new(epoch_id, membership, gate.clone());
        let handle = CheckpointerServer::new(config, automatons[0].clone(), epoch).start();

        Self {
            epoch_id,
            handle,
            gate,
            automatons,
        }
    }

    /// Replicate a mutation to every replica
    pub fn apply(&self, mutation: &str) {
        for automaton in &self.automatons {
            automaton.apply(mutation);
        }
    }

    pub fn leader(&self) -> &Arc<MemoryAutomaton> {
        &self.automatons[0]
    }

    pub fn follower(&self, peer_id: PeerId) -> &Arc<MemoryAutomaton> {
        &self.automatons[peer_id]
    }
}
