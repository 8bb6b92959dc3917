//! Automaton layer consumed by the checkpointer
//!
//! - `AutomatonFacade`: logged position, local snapshot, local log rotation
//! - `MemoryAutomaton`: In-memory automaton for testing

pub mod memory;
pub mod traits;

pub use memory::MemoryAutomaton;
pub use traits::{AutomatonError, AutomatonFacade, Checksum, SnapshotFuture, SnapshotParams};
