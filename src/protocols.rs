//! Protocol trait for the Kademlia RPC seam.
//!
//! The node drives lookups through [`KademliaRpc`] rather than a concrete
//! socket, so the same engine runs over the real UDP endpoint and over an
//! in-process network in tests. The trait lives in its own module so the
//! node depends only on the seam, not on the transport implementation.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::identity::{Contact, NodeId};
use crate::rpc::RpcError;

/// Result of a `find_value` RPC: the value, or the peers to try next —
/// never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindValueResult {
    Value(Vec<u8>),
    Closer(Vec<Contact>),
}

/// The four Kademlia RPCs as seen by a caller.
///
/// Every call is correlated, deadline-bounded, and settles exactly once:
/// with the typed reply, or with [`RpcError::Timeout`] /
/// [`RpcError::TransportClosed`].
#[async_trait]
pub trait KademliaRpc: Send + Sync + 'static {
    /// Liveness probe; resolves with the responder's identifier.
    async fn ping(&self, to: SocketAddr, expected: Option<NodeId>) -> Result<NodeId, RpcError>;

    /// Ask a peer to store a key-value pair; resolves with its accept flag.
    async fn store(
        &self,
        to: &Contact,
        key_id: NodeId,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<bool, RpcError>;

    /// Ask a peer for the k contacts it knows closest to `target`.
    async fn find_node(&self, to: &Contact, target: NodeId) -> Result<Vec<Contact>, RpcError>;

    /// Ask a peer for a stored value, falling back to closer contacts.
    async fn find_value(&self, to: &Contact, key_id: NodeId)
        -> Result<FindValueResult, RpcError>;
}
