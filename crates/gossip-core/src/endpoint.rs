//! Per-peer aggregate: latest known state, failure detector, liveness and
//! the transport handle once a connection completes.

use crate::failure::FailureDetector;
use crate::now_millis;
use crate::transport::GossipMessages;
use crate::ReplicatedState;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

pub struct Endpoint {
    state: Arc<ReplicatedState>,
    detector: Box<dyn FailureDetector>,
    alive: bool,
    handler: Option<Arc<dyn GossipMessages>>,
    /// Failed connect attempts since the last successful connect
    connect_attempts: u32,
}

impl Endpoint {
    pub fn new(state: Arc<ReplicatedState>, detector: Box<dyn FailureDetector>) -> Self {
        Self {
            state,
            detector,
            alive: true,
            handler: None,
            connect_attempts: 0,
        }
    }

    pub fn state(&self) -> &Arc<ReplicatedState> {
        &self.state
    }

    pub fn time(&self) -> i64 {
        self.state.time
    }

    pub fn epoch(&self) -> i64 {
        self.state.epoch
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn mark_alive(&mut self) {
        self.alive = true;
    }

    pub fn mark_dead(&mut self) {
        self.alive = false;
    }

    /// Accept a new state, feeding the failure detector with the local
    /// arrival time.
    ///
    /// No-op if `state` is the instance already held.
    pub fn record(&mut self, state: Arc<ReplicatedState>) {
        self.record_at(state, now_millis());
    }

    pub fn record_at(&mut self, state: Arc<ReplicatedState>, now_ms: u64) {
        if Arc::ptr_eq(&self.state, &state) {
            return;
        }
        self.state = state;
        self.detector.record(self.state.time, now_ms);
    }

    /// Replace the state without recording a heartbeat.
    pub fn update_state(&mut self, state: Arc<ReplicatedState>) {
        self.state = state;
        trace!("new replicated state time: {}", self.state.time);
    }

    pub fn should_convict(&self, now_ms: u64) -> bool {
        self.detector.should_convict(now_ms)
    }

    pub fn handler(&self) -> Option<&Arc<dyn GossipMessages>> {
        self.handler.as_ref()
    }

    /// Whether a connection has completed and the peer can be sent to.
    pub fn is_connected(&self) -> bool {
        self.handler.is_some()
    }

    pub fn set_handler(&mut self, handler: Arc<dyn GossipMessages>) {
        self.handler = Some(handler);
        self.connect_attempts = 0;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    /// Count a failed connect, returning the new total.
    pub fn connect_failed(&mut self) -> u32 {
        self.connect_attempts += 1;
        self.connect_attempts
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.state.id)
            .field("address", &self.state.address)
            .field("time", &self.state.time)
            .field("alive", &self.alive)
            .field("connected", &self.is_connected())
            .finish()
    }
}
