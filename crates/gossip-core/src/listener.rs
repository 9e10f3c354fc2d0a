//! State-change notifications for the layer above the engine.
//!
//! The engine reports accepted state changes as [`Notification`]s. A
//! [`Dispatcher`] delivers them to the single [`GossipListener`] from its
//! own task, in the order they were produced, so a slow listener never
//! stalls a gossip round or a reply path. A panicking listener is logged
//! and the dispatcher keeps going.

use crate::{NodeId, ReplicatedState};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{error, trace};

/// Receiver of registration changes, local and remote.
pub trait GossipListener: Send + Sync {
    fn on_register(&self, id: NodeId, payload: &[u8]);

    fn on_update(&self, id: NodeId, payload: &[u8]);

    fn on_deregister(&self, id: NodeId);
}

/// A registration change derived from an accepted state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Register { id: NodeId, payload: Vec<u8> },
    Update { id: NodeId, payload: Vec<u8> },
    Deregister { id: NodeId },
}

impl Notification {
    /// Compare an accepted state with the one it replaced.
    ///
    /// Returns None for pure heartbeats (no payload change).
    pub fn classify(previous: Option<&ReplicatedState>, current: &ReplicatedState) -> Option<Self> {
        let previous = previous.filter(|p| p.is_registered());
        match (previous, &current.payload) {
            (None, None) => None,
            (None, Some(payload)) => Some(Self::Register {
                id: current.id,
                payload: payload.clone(),
            }),
            (Some(prev), None) => Some(Self::Deregister { id: prev.id }),
            (Some(prev), Some(payload)) if prev.id != current.id => Some(Self::Register {
                id: current.id,
                payload: payload.clone(),
            }),
            (Some(prev), Some(payload)) if prev.payload.as_ref() != Some(payload) => {
                Some(Self::Update {
                    id: current.id,
                    payload: payload.clone(),
                })
            }
            (Some(_), Some(_)) => None,
        }
    }

    pub fn id(&self) -> NodeId {
        match self {
            Self::Register { id, .. } | Self::Update { id, .. } | Self::Deregister { id } => *id,
        }
    }
}

/// Delivers notifications to a listener from a dedicated task.
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Dispatcher {
    /// Start the delivery task on `runtime`.
    pub fn spawn(runtime: &Handle, listener: Arc<dyn GossipListener>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        runtime.spawn(async move {
            while let Some(notification) = rx.recv().await {
                deliver(listener.as_ref(), notification);
            }
            trace!("Notification dispatcher stopped");
        });
        Self { tx }
    }

    pub fn notify(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            trace!("Dispatcher closed, dropping notification");
        }
    }
}

fn deliver(listener: &dyn GossipListener, notification: Notification) {
    let id = notification.id();
    let result = catch_unwind(AssertUnwindSafe(|| match &notification {
        Notification::Register { id, payload } => listener.on_register(*id, payload),
        Notification::Update { id, payload } => listener.on_update(*id, payload),
        Notification::Deregister { id } => listener.on_deregister(*id),
    }));
    if result.is_err() {
        error!("Listener panicked while handling notification for {}", id);
    }
}
