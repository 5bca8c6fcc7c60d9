//! # Node Identifiers and the XOR Metric
//!
//! This module defines the core identifier types used throughout kadmium:
//!
//! - [`NodeId`]: a 160-bit identifier naming a node or a stored key
//! - [`Distance`]: the XOR of two identifiers, compared as an unsigned integer
//! - [`Contact`]: an identifier paired with the UDP address it was seen at
//!
//! ## Identifier Model
//!
//! Nodes pick a random 160-bit identifier at startup; stored keys are mapped
//! into the same space by hashing the application key bytes with SHA-1
//! ([`NodeId::from_key`]). Routing and replica placement both operate on the
//! XOR distance between identifiers, so nodes and keys share one metric space.
//!
//! Bit positions count from the most significant bit: bit 0 is the MSB of
//! byte 0. [`NodeId::common_prefix_length`] is the depth at which two
//! identifiers diverge and drives k-bucket placement in the routing table.

use std::net::SocketAddr;

use sha1::{Digest, Sha1};

/// Number of bytes in an identifier.
pub const ID_LEN: usize = 20;

/// Number of bits in an identifier.
pub const ID_BITS: usize = ID_LEN * 8;

/// XOR distance between two identifiers, compared lexicographically.
pub type Distance = [u8; ID_LEN];

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; ID_LEN]);

impl NodeId {
    #[inline]
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Generate a fresh identifier from a uniform random distribution.
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Map application key bytes into the identifier space via SHA-1.
    pub fn from_key(key: &[u8]) -> Self {
        let digest = Sha1::digest(key);
        let mut bytes = [0u8; ID_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    #[inline]
    pub fn xor_distance(&self, other: &NodeId) -> Distance {
        let mut out = [0u8; ID_LEN];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        out
    }

    /// Number of leading bits this identifier shares with `other`, in
    /// `0..=160`. Equal identifiers share all 160 bits.
    pub fn common_prefix_length(&self, other: &NodeId) -> usize {
        let dist = self.xor_distance(other);
        let mut bits = 0usize;
        for byte in dist {
            if byte == 0 {
                bits += 8;
            } else {
                bits += byte.leading_zeros() as usize;
                break;
            }
        }
        bits
    }

    /// Bit at position `i`, where bit 0 is the most significant bit.
    ///
    /// # Panics
    /// Panics if `i >= 160`.
    #[inline]
    pub fn bit(&self, i: usize) -> bool {
        assert!(i < ID_BITS, "bit index out of range");
        (self.0[i / 8] >> (7 - (i % 8))) & 1 == 1
    }

    /// Copy of this identifier with bit `i` set to `value`.
    #[inline]
    pub(crate) fn with_bit(&self, i: usize, value: bool) -> NodeId {
        let mut bytes = self.0;
        let mask = 0x80u8 >> (i % 8);
        if value {
            bytes[i / 8] |= mask;
        } else {
            bytes[i / 8] &= !mask;
        }
        Self(bytes)
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != ID_LEN {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; ID_LEN];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

/// Compare two XOR distances lexicographically.
///
/// Used to determine which of two identifiers is closer to a target in the
/// Kademlia XOR metric space. Smaller distance means strictly closer;
/// distinct identifiers can never be equidistant from the same target.
#[inline]
pub fn distance_cmp(a: &Distance, b: &Distance) -> std::cmp::Ordering {
    a.cmp(b)
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; ID_LEN]> for NodeId {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<NodeId> for [u8; ID_LEN] {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A peer as the routing table knows it: identifier plus the UDP endpoint
/// it was last seen at. Two contacts are equal only if both fields match.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Contact {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl Contact {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

impl std::fmt::Debug for Contact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Contact({}, {})", &self.id.to_hex()[..16], self.addr)
    }
}

impl std::fmt::Display for Contact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", &self.id.to_hex()[..16], self.addr)
    }
}
