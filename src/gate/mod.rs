//! Log-suspension gate consumed by the checkpointer
//!
//! - `LogGate`: quorum flush, suspend and resume of mutation acceptance
//! - `MemoryGate`: Scriptable in-memory gate for testing

pub mod memory;
pub mod traits;

pub use memory::{FlushBehavior, GateEvent, MemoryGate};
pub use traits::{GateError, LogGate, QuorumFlushFuture};
