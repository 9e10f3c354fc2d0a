//! System view: which addresses this node may gossip with.
//!
//! The view tracks three pools:
//! - **Seeds**: configured bootstrap addresses
//! - **Live**: members with a completed connection that are not convicted
//! - **Unreachable**: convicted members, kept so they can be probed and
//!   rejoin without reseeding
//!
//! The local address never appears in any pool.

use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct SystemView {
    local_address: SocketAddr,
    seeds: Vec<SocketAddr>,
    live: HashSet<SocketAddr>,
    /// Convicted members and when they were convicted (ms since epoch)
    unreachable: HashMap<SocketAddr, u64>,
}

impl SystemView {
    pub fn new(local_address: SocketAddr, seeds: impl IntoIterator<Item = SocketAddr>) -> Self {
        let mut unique = Vec::new();
        for seed in seeds {
            if seed != local_address && !unique.contains(&seed) {
                unique.push(seed);
            }
        }
        Self {
            local_address,
            seeds: unique,
            live: HashSet::new(),
            unreachable: HashMap::new(),
        }
    }

    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    pub fn seeds(&self) -> &[SocketAddr] {
        &self.seeds
    }

    pub fn is_seed(&self, address: &SocketAddr) -> bool {
        self.seeds.contains(address)
    }

    /// Record that `address` is reachable.
    ///
    /// Returns true if it was not already live.
    pub fn mark_alive(&mut self, address: SocketAddr) -> bool {
        if address == self.local_address {
            return false;
        }
        self.unreachable.remove(&address);
        self.live.insert(address)
    }

    /// Move `address` to the unreachable pool.
    ///
    /// Returns true if state changed.
    pub fn mark_dead(&mut self, address: SocketAddr, now_ms: u64) -> bool {
        if address == self.local_address {
            return false;
        }
        let was_live = self.live.remove(&address);
        let newly_unreachable = !self.unreachable.contains_key(&address);
        self.unreachable.entry(address).or_insert(now_ms);
        was_live || newly_unreachable
    }

    /// Drop `address` from every pool except seeds.
    pub fn forget(&mut self, address: &SocketAddr) {
        self.live.remove(address);
        self.unreachable.remove(address);
    }

    pub fn is_live(&self, address: &SocketAddr) -> bool {
        self.live.contains(address)
    }

    pub fn is_unreachable(&self, address: &SocketAddr) -> bool {
        self.unreachable.contains_key(address)
    }

    /// When `address` was convicted, if it is unreachable.
    pub fn unreachable_since(&self, address: &SocketAddr) -> Option<u64> {
        self.unreachable.get(address).copied()
    }

    pub fn live_members(&self) -> impl Iterator<Item = &SocketAddr> {
        self.live.iter()
    }

    pub fn unreachable_members(&self) -> impl Iterator<Item = &SocketAddr> {
        self.unreachable.keys()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn unreachable_count(&self) -> usize {
        self.unreachable.len()
    }

    /// Pick up to `fanout` distinct random live members.
    pub fn select_partners<R: Rng>(&self, fanout: usize, rng: &mut R) -> Vec<SocketAddr> {
        let mut candidates: Vec<_> = self.live.iter().copied().collect();
        // HashSet order is arbitrary; sort so a seeded rng is reproducible
        candidates.sort();
        candidates.shuffle(rng);
        candidates.truncate(fanout);
        candidates
    }

    /// Maybe pick an unreachable member to probe.
    ///
    /// The chance grows with the share of unreachable members:
    /// `unreachable / (live + 1)`.
    pub fn random_unreachable_member<R: Rng>(&self, rng: &mut R) -> Option<SocketAddr> {
        if self.unreachable.is_empty() {
            return None;
        }
        let probability = self.unreachable.len() as f64 / (self.live.len() + 1) as f64;
        if rng.random::<f64>() >= probability {
            return None;
        }
        let mut candidates: Vec<_> = self.unreachable.keys().copied().collect();
        candidates.sort();
        candidates.choose(rng).copied()
    }

    /// Pick a random seed not in `exclude`.
    pub fn random_seed_member<R: Rng>(
        &self,
        exclude: &[SocketAddr],
        rng: &mut R,
    ) -> Option<SocketAddr> {
        let candidates: Vec<_> = self
            .seeds
            .iter()
            .filter(|s| !exclude.contains(s))
            .copied()
            .collect();
        candidates.choose(rng).copied()
    }
}
