//! Wire protocol for peer-to-peer gossip.
//!
//! One datagram carries one [`GossipMessage`], bincode-encoded. Messages
//! that would not fit in a single datagram are split before sending.

pub mod message;

pub use message::{CodecError, GossipMessage, MAX_DATAGRAM_SIZE};
