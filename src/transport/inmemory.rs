//! In-memory transport implementation for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::messages::{BuildSnapshotRequest, BuildSnapshotResponse, RotateLogRequest, RotateLogResponse};
use super::{PeerChannel, TransportError};
use crate::membership::PeerId;
use crate::replica::ReplicaService;

/// Request types that can be sent to a replica
pub(crate) enum Request {
    BuildSnapshot {
        request: BuildSnapshotRequest,
        reply: oneshot::Sender<Result<BuildSnapshotResponse, String>>,
    },
    RotateLog {
        request: RotateLogRequest,
        reply: oneshot::Sender<Result<RotateLogResponse, String>>,
    },
}

/// In-memory channel to one replica
pub struct InMemoryChannel {
    /// Sender to the replica's request queue
    sender: mpsc::Sender<Request>,
    /// Optional timeout for RPC calls
    timeout: Option<Duration>,
}

impl InMemoryChannel {
    /// Create a channel without a timeout
    fn new(sender: mpsc::Sender<Request>) -> Self {
        Self { sender, timeout: None }
    }

    /// Create a channel with a timeout
    fn with_timeout(sender: mpsc::Sender<Request>, timeout: Duration) -> Self {
        Self {
            sender,
            timeout: Some(timeout),
        }
    }

    async fn call<R>(
        &self,
        make_request: impl FnOnce(oneshot::Sender<Result<R, String>>) -> Request,
    ) -> Result<R, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make_request(reply_tx))
            .await
            .map_err(|_| TransportError::ConnectionFailed)?;

        // Apply timeout if configured
        let reply = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, reply_rx)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => reply_rx.await,
        };
        reply
            .map_err(|_| TransportError::ConnectionFailed)?
            .map_err(TransportError::Remote)
    }
}

#[async_trait]
impl PeerChannel for InMemoryChannel {
    async fn build_snapshot(&self, request: BuildSnapshotRequest) -> Result<BuildSnapshotResponse, TransportError> {
        self.call(|reply| Request::BuildSnapshot { request, reply }).await
    }

    async fn rotate_log(&self, request: RotateLogRequest) -> Result<RotateLogResponse, TransportError> {
        self.call(|reply| Request::RotateLog { request, reply }).await
    }
}

/// Handle for a replica that processes incoming requests
pub struct ReplicaHandle {
    receiver: mpsc::Receiver<Request>,
}

impl ReplicaHandle {
    /// Process one incoming request with the given service
    /// Returns false once every channel to this replica is gone
    pub async fn process_one(&mut self, service: &dyn ReplicaService) -> bool {
        match self.receiver.recv().await {
            Some(request) => {
                Self::handle_request(request, service).await;
                true
            }
            None => false,
        }
    }

    /// Serve requests in the background until every channel is dropped
    /// Each request runs in its own task so a slow snapshot does not
    /// hold back a rotation request.
    pub fn serve(mut self, service: Arc<dyn ReplicaService>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(request) = self.receiver.recv().await {
                let service = service.clone();
                tokio::spawn(async move {
                    Self::handle_request(request, service.as_ref()).await;
                });
            }
        })
    }

    async fn handle_request(request: Request, service: &dyn ReplicaService) {
        match request {
            Request::BuildSnapshot { request, reply } => {
                let result = service.build_snapshot(request).await;
                let _ = reply.send(result);
            }
            Request::RotateLog { request, reply } => {
                let result = service.rotate_log(request).await;
                let _ = reply.send(result);
            }
        }
    }
}

/// Create channels and handles for the given replicas
pub fn create_cluster(peer_ids: &[PeerId]) -> (HashMap<PeerId, InMemoryChannel>, HashMap<PeerId, ReplicaHandle>) {
    create_cluster_with_timeout(peer_ids, None)
}

/// Create channels and handles for the given replicas with optional timeout
pub fn create_cluster_with_timeout(
    peer_ids: &[PeerId],
    timeout: Option<Duration>,
) -> (HashMap<PeerId, InMemoryChannel>, HashMap<PeerId, ReplicaHandle>) {
    let mut channels = HashMap::new();
    let mut handles = HashMap::new();

    for &id in peer_ids {
        let (tx, rx) = mpsc::channel(32);
        let channel = match timeout {
            Some(t) => InMemoryChannel::with_timeout(tx, t),
            None => InMemoryChannel::new(tx),
        };
        channels.insert(id, channel);
        handles.insert(id, ReplicaHandle { receiver: rx });
    }

    (channels, handles)
}
