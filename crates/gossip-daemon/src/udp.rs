//! UDP transport for the gossip engine.
//!
//! One socket serves every peer. Each datagram carries one bincode-encoded
//! [`GossipMessage`]; larger messages are split before sending. Inbound
//! datagrams are decoded on the receive loop and handed to the engine on
//! their own task, so a slow reconciliation never stalls the socket.
//!
//! UDP has no connection setup: `connect` completes immediately (on a
//! spawned task) with a handle that sends to the peer's address.

use async_trait::async_trait;
use gossip_core::gossip::Gossip;
use gossip_core::transport::{
    ConnectAction, GossipCommunications, GossipMessages, Result, TransportError,
};
use gossip_core::{Digest, GossipMessage, ReplicatedState};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Receive buffer size; one more than the largest valid datagram so
/// oversize datagrams are detected rather than silently truncated.
const RECV_BUFFER_SIZE: usize = gossip_core::MAX_DATAGRAM_SIZE + 1;

pub struct UdpCommunications {
    socket: Arc<UdpSocket>,
    local: SocketAddr,
    gossip: RwLock<Option<Weak<Gossip>>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl UdpCommunications {
    /// Bind the gossip socket. The receive loop starts with `start`.
    pub async fn bind(address: SocketAddr) -> std::io::Result<Arc<Self>> {
        let socket = UdpSocket::bind(address).await?;
        let local = socket.local_addr()?;
        if local.ip().is_unspecified() {
            warn!(
                "Gossip socket bound to {}; peers will be told this unspecified address",
                local
            );
        }
        info!("Gossip socket bound on {}", local);

        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            local,
            gossip: RwLock::new(None),
            receiver: Mutex::new(None),
            running: AtomicBool::new(false),
        }))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn handle(&self, peer: SocketAddr) -> Arc<UdpHandle> {
        Arc::new(UdpHandle {
            socket: self.socket.clone(),
            peer,
        })
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, gossip: Weak<Gossip>) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                // ICMP port-unreachable surfaces here on some platforms
                debug!("Receive error: {}", e);
                continue;
            }
        };

        let message = match GossipMessage::decode(&buf[..len]) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping datagram from {}: {}", from, e);
                continue;
            }
        };

        let Some(engine) = gossip.upgrade() else {
            debug!("Engine dropped, stopping receive loop");
            break;
        };

        trace!("Received {} ({} items) from {}", message.kind(), message.len(), from);
        let handle = UdpHandle {
            socket: socket.clone(),
            peer: from,
        };
        tokio::spawn(async move {
            engine.handle_message(message, &handle);
        });
    }
}

#[async_trait]
impl GossipCommunications for UdpCommunications {
    fn connect(&self, address: SocketAddr, on_connected: ConnectAction) {
        let result = if self.is_running() {
            let handle: Arc<dyn GossipMessages> = self.handle(address);
            Ok(handle)
        } else {
            Err(TransportError::NotRunning)
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { on_connected(result) });
            }
            Err(_) => on_connected(result),
        }
    }

    fn send(&self, state: &ReplicatedState, address: SocketAddr) -> Result<()> {
        send_message(
            &self.socket,
            address,
            GossipMessage::Update {
                states: vec![state.clone()],
            },
        )
    }

    fn set_gossip(&self, gossip: Weak<Gossip>) {
        *self.gossip.write().unwrap_or_else(|e| e.into_inner()) = Some(gossip);
    }

    fn local_address(&self) -> SocketAddr {
        self.local
    }

    async fn start(&self) -> Result<()> {
        let Some(gossip) = self.gossip.read().unwrap_or_else(|e| e.into_inner()).clone() else {
            return Err(TransportError::NotRunning);
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let task = tokio::spawn(receive_loop(self.socket.clone(), gossip));
        *self.receiver.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        info!("Listening for gossip on {}", self.local);
        Ok(())
    }

    async fn terminate(&self) {
        self.running.store(false, Ordering::SeqCst);
        let task = self
            .receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
        info!("Stopped listening on {}", self.local);
    }
}

/// Sends the three message legs to one peer over the shared socket.
pub struct UdpHandle {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
}

impl GossipMessages for UdpHandle {
    fn address(&self) -> SocketAddr {
        self.peer
    }

    fn gossip(&self, digests: Vec<Digest>) -> Result<()> {
        send_message(&self.socket, self.peer, GossipMessage::Gossip { digests })
    }

    fn reply(&self, digests: Vec<Digest>, states: Vec<ReplicatedState>) -> Result<()> {
        send_message(
            &self.socket,
            self.peer,
            GossipMessage::Reply { digests, states },
        )
    }

    fn update(&self, states: Vec<ReplicatedState>) -> Result<()> {
        send_message(&self.socket, self.peer, GossipMessage::Update { states })
    }
}

fn send_message(socket: &UdpSocket, peer: SocketAddr, message: GossipMessage) -> Result<()> {
    let kind = message.kind();
    let datagrams = message
        .encode_batched()
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
    for datagram in &datagrams {
        socket.try_send_to(datagram, peer)?;
    }
    trace!("Sent {} to {} in {} datagram(s)", kind, peer, datagrams.len());
    Ok(())
}
