//! Checkpointer - coordinates distributed snapshots and changelog rotations
//!
//! The checkpointer lives on the automaton context: a single task that owns
//! the in-flight flags and is the only place that resumes the log gate.
//! Callers talk to it through a [`CheckpointerHandle`]; checkpoint sessions
//! hand continuations back to it through an [`AutomatonInvoker`].

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::config::CheckpointConfig;
use super::epoch::EpochContext;
use super::error::CheckpointError;
use super::outcome::Outcome;
use super::session::{CheckpointSession, SessionOutcomes, SessionParams};
use super::version::Version;
use crate::automaton::{AutomatonFacade, SnapshotParams};

/// Continuations scheduled onto the automaton context by sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AutomatonTask {
    /// The snapshot fan-out of a session has completed
    SnapshotFinished,
    /// A quorum of replicas has rotated the changelog
    RotationCommitted,
}

/// Schedules continuations onto the automaton context
///
/// Holds only a weak reference to the context's queue: a session must not
/// keep its checkpointer alive, and continuations for a checkpointer that
/// has stopped are dropped.
#[derive(Clone)]
pub(crate) struct AutomatonInvoker {
    sender: mpsc::WeakUnboundedSender<AutomatonTask>,
}

impl AutomatonInvoker {
    /// Returns false if the checkpointer is gone
    pub(crate) fn invoke(&self, task: AutomatonTask) -> bool {
        let Some(sender) = self.sender.upgrade() else {
            debug!(?task, "Checkpointer is gone, dropping automaton task");
            return false;
        };
        sender.send(task).is_ok()
    }
}

/// Result of starting a distributed snapshot
#[derive(Debug)]
pub struct BuildSnapshotResult {
    /// Resolves once a quorum has rotated the changelog
    pub rotation: Outcome<()>,
    /// Resolves with the local snapshot build result
    pub snapshot: Outcome<SnapshotParams>,
    /// Id of the snapshot being built
    pub snapshot_id: u32,
}

/// In-flight checkpoint flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointStatus {
    pub rotating: bool,
    pub building_snapshot: bool,
}

/// Checkpoint state owned by the automaton context
pub(crate) struct Checkpointer {
    config: CheckpointConfig,
    automaton: Arc<dyn AutomatonFacade>,
    epoch: EpochContext,
    invoker: AutomatonInvoker,
    rotating: bool,
    building_snapshot: bool,
}

impl Checkpointer {
    pub(crate) fn new(
        config: CheckpointConfig,
        automaton: Arc<dyn AutomatonFacade>,
        epoch: EpochContext,
        invoker: AutomatonInvoker,
    ) -> Self {
        Self {
            config,
            automaton,
            epoch,
            invoker,
            rotating: false,
            building_snapshot: false,
        }
    }

    pub(crate) fn can_rotate_log(&self) -> bool {
        self.check_can_rotate_log().is_ok()
    }

    pub(crate) fn can_build_snapshot(&self) -> bool {
        self.check_can_build_snapshot().is_ok()
    }

    pub(crate) fn status(&self) -> CheckpointStatus {
        CheckpointStatus {
            rotating: self.rotating,
            building_snapshot: self.building_snapshot,
        }
    }

    /// Returns the position the next segment will start at
    fn check_can_rotate_log(&self) -> Result<Version, CheckpointError> {
        if self.rotating {
            return Err(CheckpointError::RotationInProgress);
        }
        let version = self.automaton.logged_position();
        version.rotate().ok_or(CheckpointError::SegmentIdsExhausted { version })
    }

    fn check_can_build_snapshot(&self) -> Result<Version, CheckpointError> {
        if self.building_snapshot {
            return Err(CheckpointError::SnapshotInProgress);
        }
        let next = self.check_can_rotate_log()?;
        let version = self.automaton.logged_position();
        if version.is_segment_empty() {
            return Err(CheckpointError::EmptyLog { version });
        }
        Ok(next)
    }

    /// Start a distributed changelog rotation
    pub(crate) fn rotate_log(&mut self) -> Result<Outcome<()>, CheckpointError> {
        self.check_can_rotate_log()?;
        let outcomes = self.start_session(false, false);
        Ok(outcomes.rotation)
    }

    /// Start a distributed snapshot, rotating the changelog along the way
    pub(crate) fn build_snapshot(&mut self, read_only: bool) -> Result<BuildSnapshotResult, CheckpointError> {
        // The snapshot is named after the segment the rotation opens
        let next = self.check_can_build_snapshot()?;
        let outcomes = self.start_session(true, read_only);
        Ok(BuildSnapshotResult {
            snapshot_id: next.segment_id,
            rotation: outcomes.rotation,
            snapshot: outcomes.snapshot,
        })
    }

    fn start_session(&mut self, build_snapshot: bool, read_only: bool) -> SessionOutcomes {
        self.rotating = true;
        if build_snapshot {
            self.building_snapshot = true;
        }

        let version = self.automaton.logged_position();
        let flushed = self.epoch.gate.flush();
        self.epoch.gate.suspend();

        info!(%version, build_snapshot, read_only, "Starting distributed changelog rotation");

        let params = SessionParams {
            build_snapshot,
            set_read_only: read_only,
            version,
            epoch_id: self.epoch.epoch_id,
            config: self.config.clone(),
            automaton: self.automaton.clone(),
            membership: self.epoch.membership.clone(),
            invoker: self.invoker.clone(),
        };
        let (session, outcomes) = CheckpointSession::new(params);
        tokio::spawn(session.run(flushed));
        outcomes
    }

    pub(crate) fn run_automaton_task(&mut self, task: AutomatonTask) {
        match task {
            AutomatonTask::SnapshotFinished => {
                self.building_snapshot = false;
                debug!("Snapshot build finished");
            }
            AutomatonTask::RotationCommitted => {
                self.rotating = false;
                self.epoch.gate.resume();
                info!("Changelog rotation finished, logging resumed");
            }
        }
    }
}

/// Requests sent to the checkpointer from its handles
enum Command {
    RotateLog {
        reply: oneshot::Sender<Result<Outcome<()>, CheckpointError>>,
    },
    BuildSnapshot {
        read_only: bool,
        reply: oneshot::Sender<Result<BuildSnapshotResult, CheckpointError>>,
    },
    CanRotateLog {
        reply: oneshot::Sender<bool>,
    },
    CanBuildSnapshot {
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<CheckpointStatus>,
    },
}

/// Handle for interacting with a running checkpointer
#[derive(Clone)]
pub struct CheckpointerHandle {
    command_tx: mpsc::Sender<Command>,
    shutdown_tx: mpsc::Sender<()>,
}

impl CheckpointerHandle {
    async fn request<R>(&self, make_command: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R, CheckpointError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(make_command(reply_tx))
            .await
            .map_err(|_| CheckpointError::Stopped)?;
        reply_rx.await.map_err(|_| CheckpointError::Stopped)
    }

    /// Start a distributed changelog rotation
    /// Fails with `RotationInProgress` if one is already running
    pub async fn rotate_log(&self) -> Result<Outcome<()>, CheckpointError> {
        self.request(|reply| Command::RotateLog { reply }).await?
    }

    /// Start a distributed snapshot
    /// Fails if a checkpoint is running or the current segment is empty
    pub async fn build_snapshot(&self, read_only: bool) -> Result<BuildSnapshotResult, CheckpointError> {
        self.request(|reply| Command::BuildSnapshot { read_only, reply }).await?
    }

    /// Whether `rotate_log` would be accepted right now
    pub async fn can_rotate_log(&self) -> bool {
        self.request(|reply| Command::CanRotateLog { reply }).await.unwrap_or(false)
    }

    /// Whether `build_snapshot` would be accepted right now
    pub async fn can_build_snapshot(&self) -> bool {
        self.request(|reply| Command::CanBuildSnapshot { reply }).await.unwrap_or(false)
    }

    /// Current in-flight flags
    pub async fn status(&self) -> Result<CheckpointStatus, CheckpointError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Stop the checkpointer; running sessions still resolve their outcomes
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Server running the checkpointer on its own automaton task
pub struct CheckpointerServer {
    checkpointer: Checkpointer,
    task_rx: mpsc::UnboundedReceiver<AutomatonTask>,
    // Keeps the invokers' weak senders alive while the server runs
    _task_tx: mpsc::UnboundedSender<AutomatonTask>,
}

impl CheckpointerServer {
    pub fn new(config: CheckpointConfig, automaton: Arc<dyn AutomatonFacade>, epoch: EpochContext) -> Self {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let invoker = AutomatonInvoker {
            sender: task_tx.downgrade(),
        };
        Self {
            checkpointer: Checkpointer::new(config, automaton, epoch, invoker),
            task_rx,
            _task_tx: task_tx,
        }
    }

    /// Start the server and return a handle for interaction
    /// The server stops on `shutdown` or once every handle is dropped
    pub fn start(self) -> CheckpointerHandle {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(self.run(command_rx, shutdown_rx));
        CheckpointerHandle {
            command_tx,
            shutdown_tx,
        }
    }

    /// Main automaton loop
    async fn run(mut self, mut command_rx: mpsc::Receiver<Command>, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(epoch = %self.checkpointer.epoch.epoch_id, "Checkpointer started");

        loop {
            tokio::select! {
                // Continuations run before new commands so that a caller who
                // observed an outcome also observes its cleared flags
                biased;

                _ = shutdown_rx.recv() => break,
                Some(task) = self.task_rx.recv() => {
                    self.checkpointer.run_automaton_task(task);
                }
                Some(command) = command_rx.recv() => {
                    self.handle_command(command);
                }
                else => break,
            }
        }

        info!(epoch = %self.checkpointer.epoch.epoch_id, "Checkpointer stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::RotateLog { reply } => {
                let _ = reply.send(self.checkpointer.rotate_log());
            }
            Command::BuildSnapshot { read_only, reply } => {
                let _ = reply.send(self.checkpointer.build_snapshot(read_only));
            }
            Command::CanRotateLog { reply } => {
                let _ = reply.send(self.checkpointer.can_rotate_log());
            }
            Command::CanBuildSnapshot { reply } => {
                let _ = reply.send(self.checkpointer.can_build_snapshot());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.checkpointer.status());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::automaton::{AutomatonError, MemoryAutomaton};
    use crate::core::epoch::EpochId;
    use crate::core::version::Version;
    use crate::gate::{FlushBehavior, GateError, GateEvent, MemoryGate};
    use crate::membership::{PeerId, StaticMembership};
    use crate::testing::{init_tracing, wait_until, Script, ScriptedPeer};
    use crate::transport::{PeerChannel, TransportError};

    struct Fixture {
        handle: CheckpointerHandle,
        automaton: Arc<MemoryAutomaton>,
        gate: Arc<MemoryGate>,
        peers: Vec<Arc<ScriptedPeer>>,
    }

    /// Leader is replica 0, scripted peers are replicas 1..
    fn start(automaton: MemoryAutomaton, peers: Vec<ScriptedPeer>, config: CheckpointConfig) -> Fixture {
        init_tracing();
        let peers: Vec<Arc<ScriptedPeer>> = peers.into_iter().map(Arc::new).collect();
        let channels: HashMap<PeerId, Arc<dyn PeerChannel>> = peers
            .iter()
            .enumerate()
            .map(|(i, peer)| (i + 1, peer.clone() as Arc<dyn PeerChannel>))
            .collect();
        let membership = Arc::new(StaticMembership::new(0, peers.len() + 1, channels));
        let automaton = Arc::new(automaton);
        let gate = Arc::new(MemoryGate::new());
        let epoch = EpochContext::new(EpochId(9), membership, gate.clone());
        let handle = CheckpointerServer::new(config, automaton.clone(), epoch).start();
        Fixture {
            handle,
            automaton,
            gate,
            peers,
        }
    }

    fn fast_config() -> CheckpointConfig {
        CheckpointConfig::default()
            .with_control_rpc_timeout(Duration::from_millis(200))
            .with_snapshot_build_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_rotation_commits_with_one_follower_missing() {
        let fixture = start(
            MemoryAutomaton::at(Version::new(1, 5)),
            vec![ScriptedPeer::new(), ScriptedPeer::new().hang()],
            fast_config(),
        );

        let rotation = fixture.handle.rotate_log().await.unwrap();
        assert_eq!(rotation.await, Ok(()));

        let status = fixture.handle.status().await.unwrap();
        assert!(!status.rotating);
        assert!(fixture.handle.can_rotate_log().await);
        assert_eq!(fixture.automaton.logged_position(), Version::new(2, 0));
        assert_eq!(
            fixture.gate.events(),
            vec![GateEvent::Flush, GateEvent::Suspend, GateEvent::Resume]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_fails_when_followers_do_not_answer() {
        let fixture = start(
            MemoryAutomaton::at(Version::new(1, 5)),
            vec![
                ScriptedPeer::new().with_rotation_script(Script::Reply(Err(TransportError::ConnectionFailed))),
                ScriptedPeer::new().hang(),
            ],
            fast_config(),
        );

        let rotation = fixture.handle.rotate_log().await.unwrap();
        assert_eq!(
            rotation.await,
            Err(CheckpointError::InsufficientQuorum {
                achieved: 1,
                required: 2,
                total: 3,
            })
        );

        // The epoch has to be restarted; logging stays suspended
        assert!(!fixture.handle.can_rotate_log().await);
        assert!(fixture.gate.is_suspended());
    }

    #[tokio::test]
    async fn test_postponed_rotations_do_not_count() {
        let fixture = start(
            MemoryAutomaton::at(Version::new(1, 5)),
            vec![ScriptedPeer::new().with_rotated(false), ScriptedPeer::new().with_rotated(false)],
            fast_config(),
        );

        let rotation = fixture.handle.rotate_log().await.unwrap();
        assert!(matches!(
            rotation.await,
            Err(CheckpointError::InsufficientQuorum { achieved: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_rotation_failure_beats_late_remote_successes() {
        let automaton = MemoryAutomaton::at(Version::new(1, 5));
        automaton.fail_rotations("disk full");
        let fixture = start(
            automaton,
            vec![
                ScriptedPeer::new().with_delay(Duration::from_millis(50)),
                ScriptedPeer::new().with_delay(Duration::from_millis(50)),
            ],
            fast_config(),
        );

        let rotation = fixture.handle.rotate_log().await.unwrap();
        assert_eq!(
            rotation.await,
            Err(CheckpointError::LocalRotation(AutomatonError::Rotation("disk full".into())))
        );
        assert!(!fixture.handle.can_rotate_log().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_quorum_waits_for_local_rotation() {
        let automaton = MemoryAutomaton::at(Version::new(1, 5));
        automaton.set_rotation_delay(Duration::from_millis(100));
        let fixture = start(automaton, vec![ScriptedPeer::new(), ScriptedPeer::new()], fast_config());

        let mut rotation = fixture.handle.rotate_log().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Both followers rotated, but the leader has not
        assert_eq!(fixture.peers[0].rotation_requests().len(), 1);
        assert_eq!(rotation.try_take(), None);
        assert!(!fixture.gate.try_accept());

        assert_eq!(rotation.await, Ok(()));
        assert_eq!(fixture.automaton.rotations(), 1);
        assert!(!fixture.handle.status().await.unwrap().rotating);
        assert!(fixture.gate.try_accept());
    }

    #[tokio::test]
    async fn test_second_rotation_rejected_while_in_flight() {
        let fixture = start(MemoryAutomaton::at(Version::new(1, 5)), vec![ScriptedPeer::new()], fast_config());
        fixture.gate.set_behavior(FlushBehavior::Hold);

        let _rotation = fixture.handle.rotate_log().await.unwrap();
        assert!(!fixture.handle.can_rotate_log().await);
        let err = fixture.handle.rotate_log().await.unwrap_err();
        assert_eq!(err, CheckpointError::RotationInProgress);
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_snapshot_rejected_on_empty_segment() {
        let fixture = start(MemoryAutomaton::at(Version::new(3, 0)), vec![ScriptedPeer::new()], fast_config());

        assert!(!fixture.handle.can_build_snapshot().await);
        assert_eq!(
            fixture.handle.build_snapshot(false).await.unwrap_err(),
            CheckpointError::EmptyLog {
                version: Version::new(3, 0)
            }
        );
        // Rotating an empty segment is still allowed
        assert!(fixture.handle.can_rotate_log().await);
    }

    #[tokio::test]
    async fn test_back_to_back_snapshots() {
        let fixture = start(MemoryAutomaton::at(Version::new(1, 5)), vec![ScriptedPeer::new()], fast_config());
        fixture.gate.set_behavior(FlushBehavior::Hold);

        let _first = fixture.handle.build_snapshot(false).await.unwrap();
        assert_eq!(
            fixture.handle.build_snapshot(false).await.unwrap_err(),
            CheckpointError::SnapshotInProgress
        );
        assert_eq!(
            fixture.handle.rotate_log().await.unwrap_err(),
            CheckpointError::RotationInProgress
        );
    }

    #[tokio::test]
    async fn test_snapshot_id_follows_captured_segment() {
        let automaton = MemoryAutomaton::at(Version::new(4, 0));
        automaton.apply("set k v");
        let fixture = start(automaton, vec![ScriptedPeer::new(), ScriptedPeer::new()], fast_config());

        let result = fixture.handle.build_snapshot(false).await.unwrap();
        assert_eq!(result.snapshot_id, 5);

        let snapshot = result.snapshot.await.unwrap();
        assert_eq!(snapshot.version, Version::new(4, 1));
        assert_eq!(snapshot.checksum, fixture.automaton.checksum());
        assert_eq!(result.rotation.await, Ok(()));

        let handle = fixture.handle.clone();
        assert!(wait_until(Duration::from_secs(1), || async { !handle.status().await.unwrap().building_snapshot }).await);
    }

    #[tokio::test]
    async fn test_local_snapshot_failure_leaves_rotation_alone() {
        let automaton = MemoryAutomaton::at(Version::new(2, 3));
        automaton.fail_snapshots("out of memory");
        let fixture = start(automaton, vec![ScriptedPeer::new(), ScriptedPeer::new()], fast_config());

        let result = fixture.handle.build_snapshot(false).await.unwrap();
        assert_eq!(
            result.snapshot.await,
            Err(CheckpointError::LocalSnapshot(AutomatonError::Snapshot("out of memory".into())))
        );
        assert_eq!(result.rotation.await, Ok(()));

        let handle = fixture.handle.clone();
        assert!(wait_until(Duration::from_secs(1), || async { !handle.status().await.unwrap().building_snapshot }).await);

        // The new segment needs a record before the next snapshot
        assert!(!handle.can_build_snapshot().await);
        fixture.automaton.apply("set k v");
        assert!(handle.can_build_snapshot().await);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_not_an_error() {
        let automaton = MemoryAutomaton::at(Version::new(2, 3));
        automaton.override_checksum(0xAA);
        let fixture = start(
            automaton,
            vec![ScriptedPeer::new().with_checksum(0xAA), ScriptedPeer::new().with_checksum(0xBB)],
            fast_config(),
        );

        let result = fixture.handle.build_snapshot(false).await.unwrap();
        assert_eq!(result.snapshot.await.map(|params| params.checksum), Ok(0xAA));
        assert_eq!(result.rotation.await, Ok(()));
    }

    #[tokio::test]
    async fn test_remote_snapshot_failure_is_ignored() {
        let fixture = start(
            MemoryAutomaton::at(Version::new(2, 3)),
            vec![
                ScriptedPeer::new().with_snapshot_script(Script::Reply(Err(TransportError::Remote("busy".into())))),
                ScriptedPeer::new(),
            ],
            fast_config(),
        );

        let result = fixture.handle.build_snapshot(true).await.unwrap();
        assert!(result.snapshot.await.is_ok());
        assert_eq!(result.rotation.await, Ok(()));
        assert!(fixture.automaton.is_read_only());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_follower_snapshot_times_out() {
        let fixture = start(
            MemoryAutomaton::at(Version::new(2, 3)),
            vec![ScriptedPeer::new().with_snapshot_script(Script::Hang), ScriptedPeer::new()],
            fast_config().with_snapshot_build_timeout(Duration::from_millis(300)),
        );

        let result = fixture.handle.build_snapshot(false).await.unwrap();
        assert!(result.snapshot.await.is_ok());
        assert_eq!(result.rotation.await, Ok(()));

        // The fan-out keeps waiting for the silent follower until its deadline
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(fixture.handle.status().await.unwrap().building_snapshot);

        tokio::time::sleep(Duration::from_millis(400)).await;
        let status = fixture.handle.status().await.unwrap();
        assert!(!status.building_snapshot);
        assert!(!status.rotating);
        assert_eq!(fixture.peers[0].snapshot_requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_local_snapshot_does_not_hold_rotation() {
        let automaton = MemoryAutomaton::at(Version::new(2, 3));
        automaton.set_snapshot_delay(Duration::from_secs(10));
        let fixture = start(automaton, vec![ScriptedPeer::new(), ScriptedPeer::new()], fast_config());

        let mut result = fixture.handle.build_snapshot(false).await.unwrap();
        assert_eq!((&mut result.rotation).await, Ok(()));
        assert_eq!(result.snapshot.try_take(), None);

        let snapshot = result.snapshot.await.unwrap();
        assert_eq!(snapshot.version, Version::new(2, 3));
    }

    #[tokio::test]
    async fn test_last_segment_cannot_rotate() {
        let fixture = start(
            MemoryAutomaton::at(Version::new(u32::MAX, 4)),
            vec![ScriptedPeer::new()],
            fast_config(),
        );

        let expected = CheckpointError::SegmentIdsExhausted {
            version: Version::new(u32::MAX, 4),
        };
        assert!(!fixture.handle.can_rotate_log().await);
        assert!(!fixture.handle.can_build_snapshot().await);
        assert_eq!(fixture.handle.rotate_log().await.unwrap_err(), expected);
        assert_eq!(fixture.handle.build_snapshot(false).await.unwrap_err(), expected);
        assert!(expected.is_precondition());
        assert!(fixture.gate.events().is_empty());
    }

    #[tokio::test]
    async fn test_requests_carry_epoch_and_captured_version() {
        let fixture = start(MemoryAutomaton::at(Version::new(6, 2)), vec![ScriptedPeer::new()], fast_config());

        let result = fixture.handle.build_snapshot(true).await.unwrap();
        result.rotation.await.unwrap();
        result.snapshot.await.unwrap();

        let peer = &fixture.peers[0];
        let snapshot_requests = peer.snapshot_requests();
        assert_eq!(snapshot_requests.len(), 1);
        assert_eq!(snapshot_requests[0].epoch_id, EpochId(9));
        assert_eq!(snapshot_requests[0].version, Version::new(6, 2));
        assert!(snapshot_requests[0].read_only);

        let rotation_requests = peer.rotation_requests();
        assert_eq!(rotation_requests.len(), 1);
        assert_eq!(rotation_requests[0].epoch_id, EpochId(9));
        assert_eq!(rotation_requests[0].version, Version::new(6, 2));
    }

    #[tokio::test]
    async fn test_observer_persistence_disabled_skips_follower_snapshots() {
        let fixture = start(
            MemoryAutomaton::at(Version::new(1, 1)),
            vec![ScriptedPeer::new(), ScriptedPeer::new()],
            fast_config().with_observer_persistence(false),
        );

        let result = fixture.handle.build_snapshot(false).await.unwrap();
        result.snapshot.await.unwrap();
        result.rotation.await.unwrap();

        for peer in &fixture.peers {
            assert!(peer.snapshot_requests().is_empty());
            assert_eq!(peer.rotation_requests().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_flush_failure_fails_both_outcomes() {
        let fixture = start(MemoryAutomaton::at(Version::new(1, 1)), vec![ScriptedPeer::new()], fast_config());
        let flush_error = GateError::FlushFailed("lost quorum".into());
        fixture.gate.set_behavior(FlushBehavior::Fail(flush_error.clone()));

        let result = fixture.handle.build_snapshot(false).await.unwrap();
        let expected = CheckpointError::QuorumFlushFailed(flush_error);
        assert_eq!(result.snapshot.await.unwrap_err(), expected);
        assert_eq!(result.rotation.await.unwrap_err(), expected);

        let status = fixture.handle.status().await.unwrap();
        assert!(status.rotating);
        assert!(!status.building_snapshot);
        assert!(fixture.peers[0].rotation_requests().is_empty());
        assert_eq!(fixture.automaton.rotations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_deadline_fails_rotation() {
        let fixture = start(
            MemoryAutomaton::at(Version::new(1, 1)),
            vec![ScriptedPeer::new()],
            fast_config().with_quorum_flush_timeout(Some(Duration::from_secs(1))),
        );
        fixture.gate.set_behavior(FlushBehavior::Hold);

        let rotation = fixture.handle.rotate_log().await.unwrap();
        assert_eq!(
            rotation.await,
            Err(CheckpointError::QuorumFlushTimedOut(Duration::from_secs(1)))
        );
    }

    #[tokio::test]
    async fn test_mutation_logged_during_flush_aborts_session() {
        let fixture = start(MemoryAutomaton::at(Version::new(1, 1)), vec![ScriptedPeer::new()], fast_config());
        fixture.gate.set_behavior(FlushBehavior::Hold);

        let rotation = fixture.handle.rotate_log().await.unwrap();
        fixture.automaton.apply("sneaky write");
        fixture.gate.release_flushes(Ok(()));

        assert_eq!(
            rotation.await,
            Err(CheckpointError::LogPositionMoved {
                expected: Version::new(1, 1),
                actual: Version::new(1, 2),
            })
        );
    }

    #[tokio::test]
    async fn test_stopped_checkpointer() {
        let fixture = start(MemoryAutomaton::at(Version::new(1, 1)), vec![ScriptedPeer::new()], fast_config());
        fixture.handle.shutdown().await;

        assert_eq!(fixture.handle.rotate_log().await.unwrap_err(), CheckpointError::Stopped);
        assert!(!fixture.handle.can_rotate_log().await);
    }

    #[test]
    fn test_invoker_does_not_keep_checkpointer_alive() {
        let (task_tx, mut task_rx) = mpsc::unbounded_channel();
        let invoker = AutomatonInvoker {
            sender: task_tx.downgrade(),
        };

        assert!(invoker.invoke(AutomatonTask::SnapshotFinished));
        assert_eq!(task_rx.try_recv().ok(), Some(AutomatonTask::SnapshotFinished));

        drop(task_tx);
        assert!(!invoker.invoke(AutomatonTask::RotationCommitted));
    }
}
