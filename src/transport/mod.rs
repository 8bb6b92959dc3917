//! Transport layer for checkpoint RPCs
//!
//! - `PeerChannel`: leader-side channel to one follower
//! - `InMemoryChannel`: Channel-based transport for testing

pub mod inmemory;
pub mod messages;
pub mod traits;

pub use traits::{PeerChannel, TransportError};
