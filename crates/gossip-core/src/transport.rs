//! Transport seams for the gossip engine.
//!
//! The engine never touches sockets. It talks to peers through two traits:
//! - [`GossipCommunications`]: the node-wide transport (connect, ring send,
//!   lifecycle, routing inbound messages back into the engine)
//! - [`GossipMessages`]: a per-peer handle produced by a completed connect
//!
//! Every send is fire-and-forget. An `Err` only reports a failure the
//! transport noticed immediately; success promises nothing about delivery.

use crate::gossip::Gossip;
use crate::{Digest, ReplicatedState};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Transport not running")]
    NotRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Completion callback for [`GossipCommunications::connect`].
///
/// May be invoked on a different thread than the one that called `connect`.
pub type ConnectAction = Box<dyn FnOnce(Result<Arc<dyn GossipMessages>>) + Send + 'static>;

/// Outbound protocol messages to one peer.
///
/// The three calls are the three legs of a push/pull exchange:
/// 1. `gossip`: our digests, sent to a partner
/// 2. `reply`: digests we want updated plus states the requester lacks
/// 3. `update`: states the partner asked for in its reply
pub trait GossipMessages: Send + Sync {
    /// Address of the peer this handle talks to
    fn address(&self) -> SocketAddr;

    fn gossip(&self, digests: Vec<Digest>) -> Result<()>;

    fn reply(&self, digests: Vec<Digest>, states: Vec<ReplicatedState>) -> Result<()>;

    fn update(&self, states: Vec<ReplicatedState>) -> Result<()>;
}

/// Node-wide transport used by the engine.
#[async_trait]
pub trait GossipCommunications: Send + Sync {
    /// Begin establishing a connection to `address`.
    ///
    /// Must not block. The peer is not usable for sending until
    /// `on_connected` runs with `Ok`.
    fn connect(&self, address: SocketAddr, on_connected: ConnectAction);

    /// Send a single state to `address` (used for ring forwarding).
    fn send(&self, state: &ReplicatedState, address: SocketAddr) -> Result<()>;

    /// Route inbound messages to `gossip`.
    fn set_gossip(&self, gossip: Weak<Gossip>);

    /// Address peers reach this node on. Stable for the process lifetime.
    fn local_address(&self) -> SocketAddr;

    async fn start(&self) -> Result<()>;

    async fn terminate(&self);
}
