//! Distributed checkpoints for a replicated state machine
//!
//! Coordinates snapshot building and changelog rotation across a quorum of
//! replicas while the leader briefly suspends accepting mutations.

pub mod automaton;
pub mod core;
pub mod gate;
pub mod membership;
pub mod replica;
pub mod transport;

/// Testing utilities for integration tests.
pub mod testing;
