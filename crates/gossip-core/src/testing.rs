//! In-memory doubles for engine tests.

use crate::failure::{FailureDetector, FailureDetectorFactory};
use crate::gossip::Gossip;
use crate::listener::{GossipListener, Notification};
use crate::transport::{
    ConnectAction, GossipCommunications, GossipMessages, Result, TransportError,
};
use crate::{Digest, NodeId, ReplicatedState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

/// How [`MockCommunications::connect`] completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Invoke the action immediately with a [`RecordingMessages`]
    Succeed,
    /// Invoke the action immediately with an error
    Fail,
    /// Hold the action until [`MockCommunications::complete_pending`]
    Hold,
}

/// Transport that records everything the engine asks of it.
pub struct MockCommunications {
    local: SocketAddr,
    mode: Mutex<ConnectMode>,
    connects: Mutex<Vec<SocketAddr>>,
    pending: Mutex<Vec<(SocketAddr, ConnectAction)>>,
    sent: Mutex<Vec<(ReplicatedState, SocketAddr)>>,
    handles: Mutex<HashMap<SocketAddr, Arc<RecordingMessages>>>,
    gossip: Mutex<Option<Weak<Gossip>>>,
}

impl MockCommunications {
    pub fn new(local: SocketAddr) -> Self {
        Self {
            local,
            mode: Mutex::new(ConnectMode::Succeed),
            connects: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            handles: Mutex::new(HashMap::new()),
            gossip: Mutex::new(None),
        }
    }

    pub fn set_mode(&self, mode: ConnectMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn connects(&self) -> Vec<SocketAddr> {
        self.connects.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(ReplicatedState, SocketAddr)> {
        self.sent.lock().unwrap().clone()
    }

    /// Handle handed out for `address`, created on first use.
    pub fn handle(&self, address: SocketAddr) -> Arc<RecordingMessages> {
        self.handles
            .lock()
            .unwrap()
            .entry(address)
            .or_insert_with(|| Arc::new(RecordingMessages::new(address)))
            .clone()
    }

    pub fn has_gossip(&self) -> bool {
        self.gossip
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|g| g.upgrade().is_some())
    }

    /// Complete every held connect, succeeding or failing all of them.
    pub fn complete_pending(&self, succeed: bool) {
        let pending: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        for (address, action) in pending {
            if succeed {
                let handle: Arc<dyn GossipMessages> = self.handle(address);
                action(Ok(handle));
            } else {
                action(Err(TransportError::ConnectionFailed(address.to_string())));
            }
        }
    }
}

#[async_trait]
impl GossipCommunications for MockCommunications {
    fn connect(&self, address: SocketAddr, on_connected: ConnectAction) {
        self.connects.lock().unwrap().push(address);
        let mode = *self.mode.lock().unwrap();
        match mode {
            ConnectMode::Succeed => {
                let handle: Arc<dyn GossipMessages> = self.handle(address);
                on_connected(Ok(handle));
            }
            ConnectMode::Fail => {
                on_connected(Err(TransportError::ConnectionFailed(address.to_string())));
            }
            ConnectMode::Hold => self.pending.lock().unwrap().push((address, on_connected)),
        }
    }

    fn send(&self, state: &ReplicatedState, address: SocketAddr) -> Result<()> {
        self.sent.lock().unwrap().push((state.clone(), address));
        Ok(())
    }

    fn set_gossip(&self, gossip: Weak<Gossip>) {
        *self.gossip.lock().unwrap() = Some(gossip);
    }

    fn local_address(&self) -> SocketAddr {
        self.local
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn terminate(&self) {}
}

/// Peer handle that records the three message legs.
pub struct RecordingMessages {
    address: SocketAddr,
    gossips: Mutex<Vec<Vec<Digest>>>,
    replies: Mutex<Vec<(Vec<Digest>, Vec<ReplicatedState>)>>,
    updates: Mutex<Vec<Vec<ReplicatedState>>>,
}

impl RecordingMessages {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            gossips: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
        }
    }

    pub fn gossips(&self) -> Vec<Vec<Digest>> {
        self.gossips.lock().unwrap().clone()
    }

    pub fn replies(&self) -> Vec<(Vec<Digest>, Vec<ReplicatedState>)> {
        self.replies.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<Vec<ReplicatedState>> {
        self.updates.lock().unwrap().clone()
    }
}

impl GossipMessages for RecordingMessages {
    fn address(&self) -> SocketAddr {
        self.address
    }

    fn gossip(&self, digests: Vec<Digest>) -> Result<()> {
        self.gossips.lock().unwrap().push(digests);
        Ok(())
    }

    fn reply(&self, digests: Vec<Digest>, states: Vec<ReplicatedState>) -> Result<()> {
        self.replies.lock().unwrap().push((digests, states));
        Ok(())
    }

    fn update(&self, states: Vec<ReplicatedState>) -> Result<()> {
        self.updates.lock().unwrap().push(states);
        Ok(())
    }
}

/// Detector whose verdict is controlled by a shared flag.
pub struct ScriptedDetector {
    convict: Arc<AtomicBool>,
    records: Arc<AtomicUsize>,
}

impl FailureDetector for ScriptedDetector {
    fn record(&mut self, _declared_time: i64, _now_ms: u64) {
        self.records.fetch_add(1, Ordering::SeqCst);
    }

    fn should_convict(&self, _now_ms: u64) -> bool {
        self.convict.load(Ordering::SeqCst)
    }
}

/// Factory whose detectors all share one conviction flag.
#[derive(Default)]
pub struct ScriptedFactory {
    convict: Arc<AtomicBool>,
    records: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_convict(&self, convict: bool) {
        self.convict.store(convict, Ordering::SeqCst);
    }

    /// Samples recorded across every detector built so far.
    pub fn records(&self) -> usize {
        self.records.load(Ordering::SeqCst)
    }
}

impl FailureDetectorFactory for ScriptedFactory {
    fn create(&self) -> Box<dyn FailureDetector> {
        Box::new(ScriptedDetector {
            convict: self.convict.clone(),
            records: self.records.clone(),
        })
    }
}

/// Listener that forwards every callback into a channel.
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl GossipListener for ChannelListener {
    fn on_register(&self, id: NodeId, payload: &[u8]) {
        let _ = self.tx.send(Notification::Register {
            id,
            payload: payload.to_vec(),
        });
    }

    fn on_update(&self, id: NodeId, payload: &[u8]) {
        let _ = self.tx.send(Notification::Update {
            id,
            payload: payload.to_vec(),
        });
    }

    fn on_deregister(&self, id: NodeId) {
        let _ = self.tx.send(Notification::Deregister { id });
    }
}
