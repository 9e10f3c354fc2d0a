//! Digests: compact (address, version) summaries exchanged at the start of
//! every gossip round.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// What a node knows about the state published from `address`.
///
/// A version of [`Digest::UNKNOWN`] means "nothing known, send everything".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest {
    pub address: SocketAddr,
    pub version: i64,
}

impl Digest {
    /// Reserved version for an address the sender has no state for.
    pub const UNKNOWN: i64 = -1;

    pub fn new(address: SocketAddr, version: i64) -> Self {
        Self { address, version }
    }

    /// Request the full state for `address`.
    pub fn unknown(address: SocketAddr) -> Self {
        Self::new(address, Self::UNKNOWN)
    }

    pub fn is_unknown(&self) -> bool {
        self.version == Self::UNKNOWN
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address, self.version)
    }
}
