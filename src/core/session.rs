//! Checkpoint session - one distributed snapshot and/or changelog rotation
//!
//! A session is started on the automaton context after the gate has been
//! flushed and suspended. It then runs on its own tasks:
//!
//! 1. wait for a quorum to persist everything up to the captured version;
//! 2. if requested, ask every replica to build a snapshot and compare checksums;
//! 3. ask every replica to rotate its changelog and wait for a quorum.
//!
//! Flag updates and resuming the gate are handed back to the automaton
//! context through the [`AutomatonInvoker`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tracing::{debug, error, info, warn};

use super::checkpointer::{AutomatonInvoker, AutomatonTask};
use super::config::CheckpointConfig;
use super::epoch::EpochId;
use super::error::CheckpointError;
use super::outcome::{Outcome, OutcomeCell};
use super::quorum::{reconcile_checksums, ChecksumReport, RotationTally};
use super::version::Version;
use crate::automaton::{AutomatonError, AutomatonFacade, Checksum, SnapshotFuture, SnapshotParams};
use crate::gate::QuorumFlushFuture;
use crate::membership::{PeerId, QuorumMembership};
use crate::transport::messages::{BuildSnapshotRequest, BuildSnapshotResponse, RotateLogRequest, RotateLogResponse};
use crate::transport::TransportError;

/// Everything a session is created with
pub(crate) struct SessionParams {
    pub build_snapshot: bool,
    pub set_read_only: bool,
    /// Logged version captured when the session started
    pub version: Version,
    pub epoch_id: EpochId,
    pub config: CheckpointConfig,
    pub automaton: Arc<dyn AutomatonFacade>,
    pub membership: Arc<dyn QuorumMembership>,
    pub invoker: AutomatonInvoker,
}

/// Caller-visible side of a session
pub(crate) struct SessionOutcomes {
    pub rotation: Outcome<()>,
    pub snapshot: Outcome<SnapshotParams>,
}

enum SnapshotReply {
    Remote(PeerId, Result<BuildSnapshotResponse, TransportError>),
    Local(Result<SnapshotParams, AutomatonError>),
}

enum RotationReply {
    Remote(PeerId, Result<RotateLogResponse, TransportError>),
    Local(Result<(), AutomatonError>),
}

/// Bound a peer call by a deadline
async fn call_with_timeout<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(deadline, call)
        .await
        .unwrap_or(Err(TransportError::Timeout))
}

/// One-shot checkpoint coordinator, shared by the tasks it spawns
pub(crate) struct CheckpointSession {
    params: SessionParams,
    snapshot_outcome: OutcomeCell<SnapshotParams>,
    rotation_outcome: OutcomeCell<()>,
}

impl CheckpointSession {
    pub(crate) fn new(params: SessionParams) -> (Arc<Self>, SessionOutcomes) {
        let (snapshot_outcome, snapshot) = OutcomeCell::new();
        let (rotation_outcome, rotation) = OutcomeCell::new();
        let outcomes = SessionOutcomes {
            rotation,
            snapshot,
        };
        let session = Arc::new(Self {
            params,
            snapshot_outcome,
            rotation_outcome,
        });
        (session, outcomes)
    }

    /// Drive the session to completion
    pub(crate) async fn run(self: Arc<Self>, flushed: QuorumFlushFuture) {
        if let Err(err) = self.await_quorum_flush(flushed).await {
            warn!(version = %self.params.version, error = %err, "Checkpoint aborted before changelog rotation");
            self.abort(err);
            return;
        }

        if self.params.build_snapshot {
            // Capture the local snapshot before the local changelog can rotate
            let local_snapshot = self.params.automaton.build_local_snapshot(self.params.set_read_only);
            tokio::spawn(self.clone().request_snapshot_creation(local_snapshot));
        }

        self.request_changelog_rotation().await;
    }

    async fn await_quorum_flush(&self, flushed: QuorumFlushFuture) -> Result<(), CheckpointError> {
        let result = match self.params.config.quorum_flush_timeout {
            Some(deadline) => tokio::time::timeout(deadline, flushed)
                .await
                .map_err(|_| CheckpointError::QuorumFlushTimedOut(deadline))?,
            None => flushed.await,
        };
        result.map_err(CheckpointError::QuorumFlushFailed)?;

        let actual = self.params.automaton.logged_position();
        if actual != self.params.version {
            return Err(CheckpointError::LogPositionMoved {
                expected: self.params.version,
                actual,
            });
        }

        debug!(version = %self.params.version, "Quorum flushed");
        Ok(())
    }

    /// Fail both outcomes; the changelog stays suspended until the epoch restarts
    fn abort(&self, err: CheckpointError) {
        if self.params.build_snapshot {
            self.params.invoker.invoke(AutomatonTask::SnapshotFinished);
        }
        self.snapshot_outcome.resolve(Err(err.clone()));
        self.rotation_outcome.resolve(Err(err));
    }

    async fn request_snapshot_creation(self: Arc<Self>, local_snapshot: SnapshotFuture) {
        let params = &self.params;
        info!(read_only = params.set_read_only, "Sending snapshot creation requests");

        let mut checksums: Vec<Option<Checksum>> = vec![None; params.membership.total_peer_count()];
        let mut replies: FuturesUnordered<BoxFuture<'_, SnapshotReply>> = FuturesUnordered::new();

        if params.config.enable_observer_persistence {
            for (peer_id, channel) in params.membership.reachable_peers() {
                debug!(peer_id, "Requesting follower to build a snapshot");
                let request = BuildSnapshotRequest {
                    epoch_id: params.epoch_id,
                    version: params.version,
                    read_only: params.set_read_only,
                };
                let deadline = params.config.snapshot_build_timeout;
                replies.push(
                    async move {
                        let result = call_with_timeout(deadline, channel.build_snapshot(request)).await;
                        SnapshotReply::Remote(peer_id, result)
                    }
                    .boxed(),
                );
            }
        }

        replies.push(local_snapshot.map(SnapshotReply::Local).boxed());

        while let Some(reply) = replies.next().await {
            match reply {
                SnapshotReply::Remote(peer_id, Ok(response)) => {
                    info!(peer_id, "Remote snapshot built by follower");
                    if let Some(slot) = checksums.get_mut(peer_id) {
                        *slot = Some(response.checksum);
                    }
                }
                SnapshotReply::Remote(peer_id, Err(err)) => {
                    warn!(peer_id, error = %err, "Error building snapshot at follower");
                }
                SnapshotReply::Local(Ok(snapshot)) => {
                    info!("Local snapshot built");
                    if let Some(slot) = checksums.get_mut(params.membership.self_id()) {
                        *slot = Some(snapshot.checksum);
                    }
                    self.snapshot_outcome.resolve(Ok(snapshot));
                }
                SnapshotReply::Local(Err(err)) => {
                    warn!(error = %err, "Error building local snapshot");
                    self.snapshot_outcome.resolve(Err(CheckpointError::LocalSnapshot(err)));
                }
            }
        }

        let report = reconcile_checksums(&checksums);
        self.log_checksum_report(&report);

        params.invoker.invoke(AutomatonTask::SnapshotFinished);
    }

    fn log_checksum_report(&self, report: &ChecksumReport) {
        let version = self.params.version;
        info!(%version, success_count = report.success_count, "Distributed snapshot creation finished");

        let Some((canonical_peer, canonical)) = report.canonical else {
            return;
        };
        if !report.has_mismatch() {
            debug!(%version, canonical_peer, "Snapshot checksums match");
            return;
        }
        for &(peer_id, checksum) in &report.mismatched {
            error!(
                %version,
                peer_id,
                checksum = %format_args!("{:x}", checksum),
                canonical_peer,
                canonical = %format_args!("{:x}", canonical),
                "Snapshot checksum mismatch"
            );
        }
    }

    async fn request_changelog_rotation(&self) {
        let params = &self.params;
        let mut tally = RotationTally::new(params.membership.quorum_peer_count());
        let mut replies: FuturesUnordered<BoxFuture<'_, RotationReply>> = FuturesUnordered::new();

        for (peer_id, channel) in params.membership.reachable_peers() {
            debug!(peer_id, "Requesting follower to rotate the changelog");
            let request = RotateLogRequest {
                epoch_id: params.epoch_id,
                version: params.version,
            };
            let deadline = params.config.control_rpc_timeout;
            replies.push(
                async move {
                    let result = call_with_timeout(deadline, channel.rotate_log(request)).await;
                    RotationReply::Remote(peer_id, result)
                }
                .boxed(),
            );
        }

        let automaton = &params.automaton;
        replies.push(async move { RotationReply::Local(automaton.rotate_local_log().await) }.boxed());

        while let Some(reply) = replies.next().await {
            match reply {
                RotationReply::Remote(peer_id, Ok(response)) if response.rotated => {
                    info!(peer_id, "Remote changelog rotated by follower");
                    tally.record_remote_success();
                    self.check_rotation_quorum(&tally);
                }
                RotationReply::Remote(peer_id, Ok(_)) => {
                    info!(peer_id, "Remote changelog rotation postponed by follower");
                }
                RotationReply::Remote(peer_id, Err(err)) => {
                    warn!(peer_id, error = %err, "Error rotating changelog at follower");
                }
                RotationReply::Local(result) => {
                    self.on_local_changelog_rotated(&mut tally, result);
                }
            }
        }

        self.on_rotation_replies_exhausted(&tally);
    }

    fn on_local_changelog_rotated(&self, tally: &mut RotationTally, result: Result<(), AutomatonError>) {
        if !tally.record_local(result.is_ok()) || self.rotation_outcome.is_resolved() {
            return;
        }

        match result {
            Ok(()) => {
                info!("Local changelog rotated");
                self.check_rotation_quorum(tally);
            }
            Err(err) => {
                warn!(error = %err, "Error rotating local changelog");
                self.rotation_outcome.resolve(Err(CheckpointError::LocalRotation(err)));
            }
        }
    }

    fn check_rotation_quorum(&self, tally: &RotationTally) {
        if self.rotation_outcome.is_resolved() || !tally.is_committed() {
            return;
        }

        info!(
            version = %self.params.version,
            remote_successes = tally.remote_successes(),
            quorum = tally.quorum(),
            "Distributed changelog rotation committed"
        );
        self.params.invoker.invoke(AutomatonTask::RotationCommitted);
        self.rotation_outcome.resolve(Ok(()));
    }

    fn on_rotation_replies_exhausted(&self, tally: &RotationTally) {
        if self.rotation_outcome.is_resolved() {
            return;
        }

        let err = CheckpointError::InsufficientQuorum {
            achieved: tally.achieved(),
            required: tally.quorum(),
            total: self.params.membership.total_peer_count(),
        };
        warn!(error = %err, "Distributed changelog rotation failed");
        self.rotation_outcome.resolve(Err(err));
    }
}
