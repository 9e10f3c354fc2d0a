//! NodeId: identity of a node in the gossip cluster.
//!
//! Wraps a u64 and displays as a 16-character hex string. The numeric
//! order of ids is the ring order used for successor forwarding.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeIdError {
    #[error("Invalid node ID format: expected 16 hex chars")]
    InvalidFormat,
    #[error("Invalid hex: {0}")]
    InvalidHex(#[from] std::num::ParseIntError),
}

/// Identity of a node, unique across the cluster.
///
/// # Examples
/// ```
/// use gossip_core::NodeId;
///
/// let parsed: NodeId = "00000000000000ff".parse().unwrap();
/// assert_eq!(parsed.as_u64(), 255);
/// assert_eq!(parsed.to_string(), "00000000000000ff");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new random node ID. Never returns zero.
    pub fn generate() -> Self {
        use rand::Rng;
        loop {
            let id: u64 = rand::rng().random();
            if id != 0 {
                return Self(id);
            }
        }
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 16 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(NodeIdError::InvalidFormat);
        }
        let id = u64::from_str_radix(&s.to_ascii_lowercase(), 16)?;
        Ok(Self(id))
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> u64 {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_never_zero() {
        for _ in 0..100 {
            assert_ne!(NodeId::generate().as_u64(), 0);
        }
    }

    #[test]
    fn test_display_is_padded_hex() {
        let id = NodeId::from(0xabc);
        assert_eq!(id.to_string(), "0000000000000abc");
    }

    #[test]
    fn test_parse_accepts_uppercase() {
        let id: NodeId = "A1B2C3D4E5F67890".parse().unwrap();
        assert_eq!(id.as_u64(), 0xa1b2c3d4e5f67890);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(matches!(
            "abc".parse::<NodeId>(),
            Err(NodeIdError::InvalidFormat)
        ));
        assert!("a1b2c3d4e5f678901".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        assert!("zzzzzzzzzzzzzzzz".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_ordering_follows_numeric_value() {
        let low = NodeId::from(1);
        let high = NodeId::from(0xffff_0000_0000_0000);
        assert!(low < high);
    }
}
