//! Gossip message envelope and its bincode codec.

use crate::{Digest, ReplicatedState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode message: {0}")]
    Encode(#[source] bincode::Error),

    #[error("Failed to decode message: {0}")]
    Decode(#[source] bincode::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("Empty message")]
    Empty,
}

/// The three legs of a push/pull exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GossipMessage {
    /// Digests of everything the sender knows
    Gossip { digests: Vec<Digest> },
    /// Digests the responder wants updated, plus states the sender lacks
    Reply {
        digests: Vec<Digest>,
        states: Vec<ReplicatedState>,
    },
    /// States requested by a reply
    Update { states: Vec<ReplicatedState> },
}

impl GossipMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Gossip { .. } => "gossip",
            Self::Reply { .. } => "reply",
            Self::Update { .. } => "update",
        }
    }

    /// Number of digests and states carried.
    pub fn len(&self) -> usize {
        match self {
            Self::Gossip { digests } => digests.len(),
            Self::Reply { digests, states } => digests.len() + states.len(),
            Self::Update { states } => states.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encode into a single datagram.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let bytes = bincode::serialize(self).map_err(CodecError::Encode)?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(CodecError::TooLarge {
                size: bytes.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Decode one datagram.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.is_empty() {
            return Err(CodecError::Empty);
        }
        if data.len() > MAX_DATAGRAM_SIZE {
            return Err(CodecError::TooLarge {
                size: data.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        bincode::deserialize(data).map_err(CodecError::Decode)
    }

    /// Encode into as many datagrams as needed.
    ///
    /// A message that does not fit is split in half and each half is
    /// encoded on its own. A single item that cannot fit is an error.
    pub fn encode_batched(self) -> Result<Vec<Vec<u8>>, CodecError> {
        match self.encode() {
            Ok(bytes) => Ok(vec![bytes]),
            Err(CodecError::TooLarge { size, max }) => {
                let Some((left, right)) = self.split() else {
                    return Err(CodecError::TooLarge { size, max });
                };
                let mut datagrams = left.encode_batched()?;
                datagrams.extend(right.encode_batched()?);
                Ok(datagrams)
            }
            Err(e) => Err(e),
        }
    }

    fn split(self) -> Option<(Self, Self)> {
        if self.len() < 2 {
            return None;
        }
        Some(match self {
            Self::Gossip { mut digests } => {
                let rest = digests.split_off(digests.len() / 2);
                (Self::Gossip { digests }, Self::Gossip { digests: rest })
            }
            Self::Reply {
                mut digests,
                mut states,
            } => {
                let digest_rest = digests.split_off(digests.len() / 2);
                let state_rest = states.split_off(states.len() / 2);
                (
                    Self::Reply { digests, states },
                    Self::Reply {
                        digests: digest_rest,
                        states: state_rest,
                    },
                )
            }
            Self::Update { mut states } => {
                let rest = states.split_off(states.len() / 2);
                (Self::Update { states }, Self::Update { states: rest })
            }
        })
    }
}
