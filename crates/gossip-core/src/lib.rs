//! gossip-core: epidemic membership and state dissemination.
//!
//! This crate provides:
//! - Push/pull anti-entropy over compact (address, version) digests
//! - Per-peer phi-accrual failure detection with conviction and rejoin
//! - Ring forwarding to the left neighbor in node-id order
//! - Transport and listener seams (`GossipCommunications`, `GossipListener`)
//! - A bincode wire envelope for the three message legs

pub mod config;
pub mod digest;
pub mod endpoint;
pub mod failure;
pub mod gossip;
pub mod listener;
pub mod node_id;
pub mod protocol;
pub mod ring;
pub mod state;
pub mod transport;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{FailureDetectorConfig, GossipConfig, ReconnectConfig};
pub use digest::Digest;
pub use failure::{FailureDetector, FailureDetectorFactory, PhiAccrualFactory};
pub use gossip::{Gossip, GossipError};
pub use listener::{GossipListener, Notification};
pub use node_id::{NodeId, NodeIdError};
pub use protocol::{CodecError, GossipMessage, MAX_DATAGRAM_SIZE};
pub use state::ReplicatedState;
pub use transport::{ConnectAction, GossipCommunications, GossipMessages, TransportError};

/// Wall clock in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
