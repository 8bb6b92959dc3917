//! Checkpoint coordination core
//!
//! - `CheckpointerServer` / `CheckpointerHandle`: long-lived coordinator on the automaton task
//! - `session`: one-shot distributed snapshot and changelog rotation
//! - `Version`: positions in the replicated log

pub mod checkpointer;
pub mod config;
pub mod epoch;
pub mod error;
pub mod outcome;
pub mod quorum;
pub(crate) mod session;
pub mod version;

pub use checkpointer::{BuildSnapshotResult, CheckpointStatus, CheckpointerHandle, CheckpointerServer};
pub use config::CheckpointConfig;
pub use epoch::{EpochContext, EpochId};
pub use error::CheckpointError;
pub use outcome::Outcome;
pub use version::Version;
