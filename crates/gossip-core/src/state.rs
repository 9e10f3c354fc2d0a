//! Replicated state: the versioned record every node publishes about itself.

use crate::{Digest, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// A node's published state.
///
/// States are immutable once built. A newer version of a node's state is a
/// new value that replaces the old one; within a node, `time` only grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedState {
    /// Identity of the publishing node
    pub id: NodeId,
    /// Opaque application payload (None = heartbeat only, nothing registered)
    pub payload: Option<Vec<u8>>,
    /// Logical time, strictly increasing per node
    pub time: i64,
    /// Start-up time of the publishing process (ms since epoch)
    pub epoch: i64,
    /// Address the publishing node gossips on
    pub address: SocketAddr,
}

impl ReplicatedState {
    pub fn new(
        id: NodeId,
        payload: Option<Vec<u8>>,
        time: i64,
        epoch: i64,
        address: SocketAddr,
    ) -> Self {
        Self {
            id,
            payload,
            time,
            epoch,
            address,
        }
    }

    /// A heartbeat-only state with no registered payload.
    pub fn heartbeat(id: NodeId, time: i64, epoch: i64, address: SocketAddr) -> Self {
        Self::new(id, None, time, epoch, address)
    }

    /// Copy of this state at a later time, keeping the payload.
    pub fn advance(&self, time: i64) -> Self {
        Self {
            time,
            ..self.clone()
        }
    }

    /// Copy of this state at a later time with a new payload.
    pub fn with_payload(&self, payload: Option<Vec<u8>>, time: i64) -> Self {
        Self {
            payload,
            time,
            ..self.clone()
        }
    }

    pub fn digest(&self) -> Digest {
        Digest::new(self.address, self.time)
    }

    pub fn is_registered(&self) -> bool {
        self.payload.is_some()
    }

    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Vec::len)
    }
}

impl fmt::Display for ReplicatedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReplicatedState [id={}, time={}, epoch={}, address={}, payload={}B]",
            self.id,
            self.time,
            self.epoch,
            self.address,
            self.payload_len()
        )
    }
}
