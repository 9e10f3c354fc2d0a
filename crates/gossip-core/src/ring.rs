//! Ring forwarding.
//!
//! Random fan-out can miss a node for several rounds in a row. The ring
//! guarantees progress: every round, each node also forwards its own state
//! to its left neighbor, the member with the next smaller id. The node
//! with the smallest id has no left neighbor and skips forwarding.
//!
//! The neighbor is computed from the current membership on every call
//! rather than maintained incrementally.

use crate::transport::GossipCommunications;
use crate::{NodeId, ReplicatedState};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{trace, warn};

/// The member immediately before `id` in id order, if any.
pub fn left_neighbor_of(members: &BTreeSet<NodeId>, id: NodeId) -> Option<NodeId> {
    members.range(..id).next_back().copied()
}

pub struct Ring {
    communications: Arc<dyn GossipCommunications>,
}

impl Ring {
    pub fn new(communications: Arc<dyn GossipCommunications>) -> Self {
        Self { communications }
    }

    /// Address of the left neighbor of `local` among `members`.
    pub fn neighbor(local: NodeId, members: &[(NodeId, SocketAddr)]) -> Option<SocketAddr> {
        let ids: BTreeSet<NodeId> = members.iter().map(|(id, _)| *id).collect();
        let left = left_neighbor_of(&ids, local)?;
        members
            .iter()
            .find(|(id, _)| *id == left)
            .map(|(_, address)| *address)
    }

    /// Forward `state` to its owner's left neighbor.
    ///
    /// Returns false when the ring has no neighbor for this node.
    pub fn send(&self, state: &ReplicatedState, members: &[(NodeId, SocketAddr)]) -> bool {
        let Some(neighbor) = Self::neighbor(state.id, members) else {
            trace!("{} has no left neighbor, not forwarding state", state.id);
            return false;
        };
        if let Err(e) = self.communications.send(state, neighbor) {
            warn!("Ring forward to {} failed: {}", neighbor, e);
        }
        true
    }
}
