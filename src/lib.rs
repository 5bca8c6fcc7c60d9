//! # kadmium — a Kademlia DHT node
//!
//! kadmium implements the core of a Kademlia distributed hash table peer:
//!
//! - **Identifiers**: 160-bit node and key identifiers under the XOR metric
//! - **Routing**: a binary trie of k-buckets that splits only along the
//!   local identifier's path and challenges stale contacts before evicting
//! - **RPC**: `PING`, `STORE`, `FIND_NODE`, `FIND_VALUE` over UDP datagrams
//!   with token-correlated replies and per-call deadlines
//! - **Lookups**: iterative α-parallel shortlist walks driving `put` and
//!   `get` in logarithmic hops
//!
//! ## Architecture
//!
//! The codebase uses the actor pattern for safe concurrent state:
//! each [`Node`] is a cheap-to-clone handle whose private actor owns the
//! routing table and value store and processes commands sequentially, so
//! core state needs no locks. The actor talks to peers through the
//! [`KademliaRpc`] trait; [`UdpEndpoint`] implements it over a datagram
//! socket, and in-process fakes implement it in tests.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `identity` | 160-bit identifiers, XOR distance, contacts |
//! | `routing` | splittable k-bucket trie with eviction challenges |
//! | `messages` | datagram wire format, encode/decode |
//! | `protocols` | the `KademliaRpc` trait seam |
//! | `rpc` | UDP endpoint: correlation, timeouts, dispatch |
//! | `node` | node actor, iterative lookups, `put`/`get`/`bootstrap` |
//!
//! ## Example
//!
//! ```no_run
//! use kadmium::Node;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let node = Node::bind("0.0.0.0:9000".parse()?).await?;
//! node.bootstrap(&["203.0.113.7:9000".parse()?]).await?;
//! node.put(b"greeting", b"hello".to_vec()).await?;
//! let value = node.get(b"greeting").await?;
//! # Ok(())
//! # }
//! ```

mod identity;
mod messages;
mod node;
mod protocols;
mod routing;
mod rpc;

pub use identity::{distance_cmp, Contact, Distance, NodeId, ID_BITS, ID_LEN};
pub use messages::{Envelope, Payload, Request, Response, WireError, MAX_VALUE_LEN};
pub use node::{Node, NodeConfig, ValueLookup, DEFAULT_ALPHA};
pub use protocols::{FindValueResult, KademliaRpc};
pub use routing::{EvictionChallenge, KBucket, ObserveOutcome, RoutingTable, DEFAULT_K};
pub use rpc::{
    InboundHandler, Reply, RpcConfig, RpcError, UdpEndpoint, DEFAULT_CALL_TIMEOUT,
};
