//! The gossip engine.
//!
//! [`Gossip`] owns the endpoint map and drives anti-entropy rounds:
//!
//! 1. The local heartbeat is bumped.
//! 2. Digests of every known state are sent to a few random live partners.
//! 3. A partner `examine`s the digests and replies with the digests it wants
//!    updated and the states it believes we lack.
//! 4. We `apply` the pushed states and answer the requested digests with an
//!    `update` (the third leg).
//! 5. The local state is also forwarded to the ring neighbor, and failure
//!    detectors are checked for conviction.
//!
//! Inbound messages arrive on transport tasks concurrently with rounds.
//! The endpoint map is a `DashMap`, so unrelated peers never contend. No
//! map guard is held across a transport or listener call.

use crate::config::{GossipConfig, calculate_backoff};
use crate::endpoint::Endpoint;
use crate::failure::FailureDetectorFactory;
use crate::listener::{Dispatcher, GossipListener, Notification};
use crate::protocol::GossipMessage;
use crate::ring::Ring;
use crate::transport::{self, GossipCommunications, GossipMessages, TransportError};
use crate::view::SystemView;
use crate::{Digest, NodeId, ReplicatedState, now_millis};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Error)]
pub enum GossipError {
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Unknown registration: {0}")]
    UnknownRegistration(NodeId),

    #[error("Listener already bound")]
    AlreadyCreated,

    #[error("No Tokio runtime to deliver notifications on")]
    NoRuntime,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, GossipError>;

pub struct Gossip {
    me: Weak<Gossip>,
    config: GossipConfig,
    communications: Arc<dyn GossipCommunications>,
    fd_factory: Arc<dyn FailureDetectorFactory>,
    endpoints: DashMap<SocketAddr, Endpoint>,
    view: RwLock<SystemView>,
    local: RwLock<Arc<ReplicatedState>>,
    ring: Ring,
    dispatcher: OnceLock<Dispatcher>,
    round_task: Mutex<Option<JoinHandle<()>>>,
}

impl Gossip {
    pub fn new(
        config: GossipConfig,
        communications: Arc<dyn GossipCommunications>,
        fd_factory: Arc<dyn FailureDetectorFactory>,
    ) -> Arc<Self> {
        let address = communications.local_address();
        let id = config.node_id.unwrap_or_else(NodeId::generate);
        let epoch = now_millis() as i64;
        let local = ReplicatedState::heartbeat(id, epoch, epoch, address);
        let view = SystemView::new(address, config.seeds.iter().copied());

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            ring: Ring::new(communications.clone()),
            config,
            communications,
            fd_factory,
            endpoints: DashMap::new(),
            view: RwLock::new(view),
            local: RwLock::new(Arc::new(local)),
            dispatcher: OnceLock::new(),
            round_task: Mutex::new(None),
        })
    }

    /// Bind the listener and route inbound transport messages here.
    ///
    /// Must be called within a Tokio runtime, at most once.
    pub fn create(self: &Arc<Self>, listener: Arc<dyn GossipListener>) -> Result<()> {
        if self.dispatcher.get().is_some() {
            return Err(GossipError::AlreadyCreated);
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| GossipError::NoRuntime)?;
        self.dispatcher
            .set(Dispatcher::spawn(&runtime, listener))
            .map_err(|_| GossipError::AlreadyCreated)?;
        self.communications.set_gossip(Arc::downgrade(self));
        Ok(())
    }

    /// Start the transport and the round timer.
    pub async fn start(&self) -> Result<()> {
        self.communications.start().await?;

        let weak = self.me.clone();
        let period = self.config.gossip_interval();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(gossip) = weak.upgrade() else {
                    break;
                };
                gossip.gossip_round();
            }
        });

        let previous = self.round_task_slot().replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }

        info!(
            "Gossip started on {} as {} (interval {:?}, {} seeds)",
            self.local_address(),
            self.id(),
            period,
            self.view_read().seeds().len()
        );
        Ok(())
    }

    /// Stop the round timer and the transport.
    pub async fn terminate(&self) {
        let task = self.round_task_slot().take();
        if let Some(task) = task {
            task.abort();
        }
        self.communications.terminate().await;
        info!("Gossip terminated on {}", self.local_address());
    }

    // ---- Local state ----

    pub fn id(&self) -> NodeId {
        self.local_read().id
    }

    pub fn local_address(&self) -> SocketAddr {
        self.communications.local_address()
    }

    pub fn local_state(&self) -> Arc<ReplicatedState> {
        self.local_read().clone()
    }

    pub fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Publish `payload` for this node, optionally under a new id.
    ///
    /// Propagates on the next round.
    pub fn register(&self, id: Option<NodeId>, payload: Vec<u8>) -> Result<NodeId> {
        self.check_size(&payload)?;
        let (previous, current) = {
            let mut local = self.local_write();
            let previous = local.clone();
            let mut next = previous.with_payload(Some(payload), next_time(previous.time));
            if let Some(id) = id {
                next.id = id;
            }
            *local = Arc::new(next);
            (previous, local.clone())
        };
        debug!("Registered {} at time {}", current.id, current.time);
        self.notify(Notification::classify(Some(&*previous), &current));
        Ok(current.id)
    }

    /// Replace the payload of the current registration.
    pub fn update(&self, id: NodeId, payload: Vec<u8>) -> Result<()> {
        self.check_size(&payload)?;
        self.replace_local(id, Some(payload))
    }

    /// Withdraw the current registration, leaving a heartbeat.
    pub fn deregister(&self, id: NodeId) -> Result<()> {
        self.replace_local(id, None)
    }

    fn replace_local(&self, id: NodeId, payload: Option<Vec<u8>>) -> Result<()> {
        let (previous, current) = {
            let mut local = self.local_write();
            if local.id != id || !local.is_registered() {
                return Err(GossipError::UnknownRegistration(id));
            }
            let previous = local.clone();
            *local = Arc::new(previous.with_payload(payload, next_time(previous.time)));
            (previous, local.clone())
        };
        debug!("Local state of {} now at time {}", current.id, current.time);
        self.notify(Notification::classify(Some(&*previous), &current));
        Ok(())
    }

    fn check_size(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_state_size {
            return Err(GossipError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_state_size,
            });
        }
        Ok(())
    }

    /// Advance the local time, keeping the payload.
    fn heartbeat(&self) -> Arc<ReplicatedState> {
        let mut local = self.local_write();
        let next = local.advance(next_time(local.time));
        *local = Arc::new(next);
        local.clone()
    }

    // ---- Membership queries ----

    pub fn endpoint_state(&self, address: &SocketAddr) -> Option<Arc<ReplicatedState>> {
        self.endpoints.get(address).map(|e| e.state().clone())
    }

    /// Liveness of the endpoint at `address`, if one exists.
    pub fn is_alive(&self, address: &SocketAddr) -> Option<bool> {
        self.endpoints.get(address).map(|e| e.is_alive())
    }

    pub fn is_connected(&self, address: &SocketAddr) -> bool {
        self.endpoints
            .get(address)
            .is_some_and(|e| e.is_connected())
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn live_members(&self) -> Vec<SocketAddr> {
        self.view_read().live_members().copied().collect()
    }

    pub fn unreachable_members(&self) -> Vec<SocketAddr> {
        self.view_read().unreachable_members().copied().collect()
    }

    /// Every known state, local first.
    pub fn known_states(&self) -> Vec<Arc<ReplicatedState>> {
        let mut states = vec![self.local_state()];
        states.extend(self.endpoints.iter().map(|e| e.state().clone()));
        states
    }

    /// Digests of every known state, local first.
    pub fn digests(&self) -> Vec<Digest> {
        self.known_states().iter().map(|s| s.digest()).collect()
    }

    // ---- Reconciliation ----

    /// Merge states pushed by a peer.
    ///
    /// Unknown addresses become new endpoints and are connected to. Known
    /// endpoints accept a state only if its time is strictly newer.
    ///
    /// A new endpoint is announced with `on_register` once its connection
    /// completes, and only if its state carries a payload.
    pub fn apply(&self, states: Vec<ReplicatedState>) {
        for state in states {
            self.apply_state(state);
        }
    }

    fn apply_state(&self, state: ReplicatedState) {
        let address = state.address;
        if address == self.local_address() {
            trace!("Ignoring state for own address at time {}", state.time);
            return;
        }
        if state.payload_len() > self.config.max_state_size {
            warn!(
                "Rejecting state from {}: payload of {} bytes exceeds {}",
                address,
                state.payload_len(),
                self.config.max_state_size
            );
            return;
        }
        let state = Arc::new(state);

        let (previous, resurrected, connected) = match self.endpoints.entry(address) {
            Entry::Vacant(vacant) => {
                let mut detector = self.fd_factory.create();
                detector.record(state.time, now_millis());
                vacant.insert(Endpoint::new(state.clone(), detector));
                info!("Discovered {} at {}", state.id, address);
                self.connect(address);
                return;
            }
            Entry::Occupied(mut occupied) => {
                let endpoint = occupied.get_mut();
                if state.time <= endpoint.time() {
                    trace!(
                        "Ignoring stale state from {} ({} <= {})",
                        address,
                        state.time,
                        endpoint.time()
                    );
                    return;
                }
                let previous = endpoint.state().clone();
                endpoint.record(state.clone());
                let resurrected = !endpoint.is_alive();
                if resurrected {
                    endpoint.mark_alive();
                }
                (previous, resurrected, endpoint.is_connected())
            }
        };

        if resurrected {
            info!("{} at {} is alive again", state.id, address);
        }
        let rejoined = resurrected && self.sync_liveness(address, now_millis());
        if !rejoined && connected {
            self.notify(Notification::classify(Some(&*previous), &state));
        }
    }

    /// Classify incoming digests and answer with one `reply`.
    ///
    /// Per digest: unknown address requests everything, a newer remote
    /// version requests the delta above our time, an older one pushes our
    /// state, and an equal one is left alone.
    pub fn examine(&self, digests: Vec<Digest>, handler: &dyn GossipMessages) {
        let local_address = self.local_address();
        let mut requests = Vec::new();
        let mut pushes = Vec::new();

        for digest in digests {
            if digest.address == local_address {
                pushes.extend(self.examine_local(&digest));
                continue;
            }
            match self.endpoints.get(&digest.address) {
                None => requests.push(Digest::unknown(digest.address)),
                Some(endpoint) => {
                    let time = endpoint.time();
                    if digest.version > time {
                        requests.push(Digest::new(digest.address, time));
                    } else if digest.version < time {
                        pushes.push(endpoint.state().as_ref().clone());
                    }
                }
            }
        }

        trace!(
            "Replying to {} with {} requests, {} states",
            handler.address(),
            requests.len(),
            pushes.len()
        );
        if let Err(e) = handler.reply(requests, pushes) {
            warn!("Failed to reply to {}: {}", handler.address(), e);
        }
    }

    /// A digest for our own address. Our copy is authoritative, so a peer
    /// holding a newer time (an earlier incarnation) makes us jump past it.
    fn examine_local(&self, digest: &Digest) -> Option<ReplicatedState> {
        let mut local = self.local_write();
        if digest.version > local.time {
            let Some(time) = digest.version.checked_add(1).filter(|t| *t < i64::MAX) else {
                warn!(
                    "Ignoring digest for own address at time {}: cannot outrank it",
                    digest.version
                );
                return None;
            };
            let next = local.advance(time);
            *local = Arc::new(next);
        }
        (digest.version < local.time).then(|| ReplicatedState::clone(&local))
    }

    /// Push every state strictly newer than the requested digests.
    pub fn answer_requests(&self, digests: Vec<Digest>, handler: &dyn GossipMessages) {
        let local_address = self.local_address();
        let mut states = Vec::new();

        for digest in digests {
            let state = if digest.address == local_address {
                Some(self.local_state())
            } else {
                self.endpoint_state(&digest.address)
            };
            if let Some(state) = state.filter(|s| s.time > digest.version) {
                states.push(state.as_ref().clone());
            }
        }

        if states.is_empty() {
            return;
        }
        if let Err(e) = handler.update(states) {
            warn!("Failed to send update to {}: {}", handler.address(), e);
        }
    }

    // ---- Inbound protocol ----

    pub fn handle_gossip(&self, digests: Vec<Digest>, handler: &dyn GossipMessages) {
        self.examine(digests, handler);
    }

    pub fn handle_reply(
        &self,
        digests: Vec<Digest>,
        states: Vec<ReplicatedState>,
        handler: &dyn GossipMessages,
    ) {
        self.apply(states);
        self.answer_requests(digests, handler);
    }

    pub fn handle_update(&self, states: Vec<ReplicatedState>) {
        self.apply(states);
    }

    /// Dispatch a decoded message from the peer behind `handler`.
    pub fn handle_message(&self, message: GossipMessage, handler: &dyn GossipMessages) {
        match message {
            GossipMessage::Gossip { digests } => self.handle_gossip(digests, handler),
            GossipMessage::Reply { digests, states } => {
                self.handle_reply(digests, states, handler)
            }
            GossipMessage::Update { states } => self.handle_update(states),
        }
    }

    // ---- Connections ----

    fn connect(&self, address: SocketAddr) {
        let weak = self.me.clone();
        self.communications.connect(
            address,
            Box::new(move |result| {
                if let Some(gossip) = weak.upgrade() {
                    gossip.connected(address, result);
                }
            }),
        );
    }

    fn connected(&self, address: SocketAddr, result: transport::Result<Arc<dyn GossipMessages>>) {
        match result {
            Ok(handler) => {
                let state = {
                    let Some(mut endpoint) = self.endpoints.get_mut(&address) else {
                        debug!("Connected to {} after it was forgotten", address);
                        return;
                    };
                    endpoint.set_handler(handler);
                    endpoint.mark_alive();
                    endpoint.state().clone()
                };
                info!("Connected to {} at {}", state.id, address);
                self.sync_liveness(address, now_millis());
            }
            Err(e) => {
                let attempts = match self.endpoints.get_mut(&address) {
                    Some(mut endpoint) => endpoint.connect_failed(),
                    None => return,
                };
                if self.config.reconnect.exceeded(attempts) {
                    warn!(
                        "Giving up on {} after {} connect attempts: {}",
                        address, attempts, e
                    );
                    self.forget(&address);
                    return;
                }
                let delay = calculate_backoff(attempts, &self.config.reconnect);
                warn!(
                    "Connect to {} failed (attempt {}): {}, retrying in {:?}",
                    address, attempts, e, delay
                );
                self.schedule_reconnect(address, delay);
            }
        }
    }

    fn schedule_reconnect(&self, address: SocketAddr, delay: Duration) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to retry {}, forgetting it", address);
            self.forget(&address);
            return;
        };
        let weak = self.me.clone();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(gossip) = weak.upgrade() else {
                return;
            };
            let pending = gossip
                .endpoints
                .get(&address)
                .is_some_and(|e| !e.is_connected());
            if pending {
                gossip.connect(address);
            }
        });
    }

    /// Drop an endpoint entirely so a later state can rediscover it.
    fn forget(&self, address: &SocketAddr) {
        self.endpoints.remove(address);
        self.view_write().forget(address);
    }

    fn handler_for(&self, address: &SocketAddr) -> Option<Arc<dyn GossipMessages>> {
        self.endpoints
            .get(address)
            .and_then(|e| e.handler().cloned())
    }

    // ---- Rounds ----

    /// Run one gossip round.
    pub fn gossip_round(&self) {
        let local = self.heartbeat();
        let digests = self.digests();

        let (partners, probe) = {
            let view = self.view_read();
            let mut rng = rand::rng();
            (
                view.select_partners(self.config.fanout, &mut rng),
                view.random_unreachable_member(&mut rng),
            )
        };

        let reached = partners
            .iter()
            .filter(|address| self.gossip_to(address, &digests))
            .count();

        if let Some(address) = probe {
            trace!("Probing unreachable member {}", address);
            self.gossip_to(&address, &digests);
        }

        self.contact_seed(reached, &partners, &digests);

        let members = self.ring_members(&local);
        self.ring.send(&local, &members);

        self.check_status(now_millis());

        debug!(
            "Round at time {}: {} digests, {}/{} partners reached, {} members",
            local.time,
            digests.len(),
            reached,
            partners.len(),
            members.len()
        );
    }

    fn gossip_to(&self, address: &SocketAddr, digests: &[Digest]) -> bool {
        let Some(handler) = self.handler_for(address) else {
            return false;
        };
        match handler.gossip(digests.to_vec()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to gossip with {}: {}", address, e);
                false
            }
        }
    }

    /// Gossip to a seed while the cluster is not yet discovered.
    fn contact_seed(&self, reached: usize, partners: &[SocketAddr], digests: &[Digest]) {
        let seed = {
            let view = self.view_read();
            if reached > 0 && view.live_count() >= view.seeds().len() {
                return;
            }
            view.random_seed_member(partners, &mut rand::rng())
        };
        let Some(seed) = seed else {
            return;
        };

        if self.gossip_to(&seed, digests) {
            return;
        }
        trace!("Contacting seed {}", seed);
        let digests = digests.to_vec();
        self.communications.connect(
            seed,
            Box::new(move |result| match result {
                Ok(handler) => {
                    if let Err(e) = handler.gossip(digests) {
                        warn!("Failed to gossip with seed {}: {}", seed, e);
                    }
                }
                Err(e) => debug!("Seed {} unreachable: {}", seed, e),
            }),
        );
    }

    /// Live endpoints plus ourselves, as (id, address) pairs.
    fn ring_members(&self, local: &ReplicatedState) -> Vec<(NodeId, SocketAddr)> {
        let mut members: Vec<_> = self
            .endpoints
            .iter()
            .filter(|e| e.is_alive() && e.is_connected())
            .map(|e| (e.state().id, *e.key()))
            .collect();
        members.push((local.id, local.address));
        members
    }

    /// Convict endpoints whose failure detector says so.
    ///
    /// Convicted endpoints keep their last state and move to the
    /// unreachable pool; a newer state brings them back.
    pub fn check_status(&self, now_ms: u64) {
        for address in self.convict(now_ms) {
            self.sync_liveness(address, now_ms);
        }
    }

    /// Mark every endpoint the failure detector convicts as dead.
    fn convict(&self, now_ms: u64) -> Vec<SocketAddr> {
        let mut convicted = Vec::new();
        for mut entry in self.endpoints.iter_mut() {
            let address = *entry.key();
            let endpoint = entry.value_mut();
            if endpoint.is_alive() && endpoint.is_connected() && endpoint.should_convict(now_ms) {
                endpoint.mark_dead();
                info!("Convicted {} at {}", endpoint.state().id, address);
                convicted.push(address);
            }
        }
        convicted
    }

    /// Move `address` between the live and unreachable pools to match its
    /// endpoint's current liveness, notifying the listener if it moved.
    ///
    /// The endpoint is re-read under the view lock, so a conviction and a
    /// resurrection racing on the same address settle on whichever flag
    /// was set last. Returns true if the address moved.
    fn sync_liveness(&self, address: SocketAddr, now_ms: u64) -> bool {
        let mut view = self.view_write();
        let Some(endpoint) = self.endpoints.get(&address) else {
            return false;
        };
        let state = endpoint.state();

        if endpoint.is_alive() {
            if !view.mark_alive(address) {
                return false;
            }
            if state.is_registered() {
                self.notify(Notification::classify(None, state));
            }
        } else {
            if !view.mark_dead(address, now_ms) {
                return false;
            }
            if state.is_registered() {
                self.notify(Some(Notification::Deregister { id: state.id }));
            }
        }
        true
    }

    // ---- Plumbing ----

    fn notify(&self, notification: Option<Notification>) {
        let Some(notification) = notification else {
            return;
        };
        match self.dispatcher.get() {
            Some(dispatcher) => dispatcher.notify(notification),
            None => trace!("No listener bound, dropping {:?}", notification),
        }
    }

    fn view_read(&self) -> RwLockReadGuard<'_, SystemView> {
        self.view.read().unwrap_or_else(|e| e.into_inner())
    }

    fn view_write(&self) -> RwLockWriteGuard<'_, SystemView> {
        self.view.write().unwrap_or_else(|e| e.into_inner())
    }

    fn local_read(&self) -> RwLockReadGuard<'_, Arc<ReplicatedState>> {
        self.local.read().unwrap_or_else(|e| e.into_inner())
    }

    fn local_write(&self) -> RwLockWriteGuard<'_, Arc<ReplicatedState>> {
        self.local.write().unwrap_or_else(|e| e.into_inner())
    }

    fn round_task_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.round_task.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Next local time: strictly greater than `current`, and at least the
/// wall clock so a restarted node outranks its previous incarnation.
fn next_time(current: i64) -> i64 {
    current.saturating_add(1).max(now_millis() as i64)
}
