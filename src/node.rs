//! # DHT Node and Lookup Engine
//!
//! The node combines the routing table, the value store, and an RPC network
//! into the four Kademlia operations plus the iterative procedures built on
//! them (`lookup_nodes`, `lookup_value`, `put`, `get`, `bootstrap`).
//!
//! ## Actor Pattern
//!
//! [`Node`] is a cheap-to-clone handle over an mpsc channel; a private
//! `NodeActor` owns the routing table and value store and processes
//! commands sequentially, so no locks guard the core state and every
//! table operation completes atomically between suspension points.
//! Queries answer over one-shot channels.
//!
//! The node is generic over [`KademliaRpc`], the outbound seam: production
//! nodes run over [`UdpEndpoint`], while tests wire nodes together with an
//! in-process network and no sockets at all.
//!
//! ## Iterative Lookups
//!
//! Lookups walk a shortlist of candidates sorted by XOR distance to the
//! target. Each round queries up to α of the closest unqueried candidates
//! in parallel, merges whatever they return, and stops once a round brings
//! nothing strictly closer than the best responder or the k closest
//! candidates have all settled. Failed candidates stay on the shortlist —
//! marked, never re-queried, and never evicted from the routing table for
//! a mere timeout.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::identity::{distance_cmp, Contact, Distance, NodeId};
use crate::messages::{Request, Response};
use crate::protocols::{FindValueResult, KademliaRpc};
use crate::routing::{ObserveOutcome, RoutingTable, DEFAULT_K};
use crate::rpc::{InboundHandler, RpcConfig, RpcError, UdpEndpoint, DEFAULT_CALL_TIMEOUT};

/// Default lookup concurrency factor.
pub const DEFAULT_ALPHA: usize = 3;

/// Node tuning parameters.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Bucket capacity and lookup result-set size.
    pub k: usize,
    /// Parallel queries per lookup round.
    pub alpha: usize,
    /// Per-RPC reply deadline.
    pub call_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            alpha: DEFAULT_ALPHA,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Outcome of an iterative value lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueLookup {
    /// A peer held the value. `cache_to` is the closest responder that did
    /// not, the natural home for an opportunistic replica.
    Found {
        value: Vec<u8>,
        cache_to: Option<Contact>,
    },
    /// No peer held the value; the closest responders are reported.
    NotFound { closest: Vec<Contact> },
}

/// Last-write-wins key-value storage for this node's share of the keyspace.
#[derive(Debug, Default)]
struct ValueStore {
    entries: HashMap<NodeId, Vec<u8>>,
}

impl ValueStore {
    fn insert(&mut self, key_id: NodeId, value: Vec<u8>) {
        self.entries.insert(key_id, value);
    }

    fn get(&self, key_id: &NodeId) -> Option<Vec<u8>> {
        self.entries.get(key_id).cloned()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

enum Command {
    Observe(Contact),
    ApplyChallenge {
        head: NodeId,
        newcomer: Contact,
        alive: bool,
    },
    Closest {
        target: NodeId,
        n: usize,
        exclude: Option<NodeId>,
        reply: oneshot::Sender<Vec<Contact>>,
    },
    StoreLocal {
        key_id: NodeId,
        value: Vec<u8>,
        reply: oneshot::Sender<()>,
    },
    GetLocal {
        key_id: NodeId,
        reply: oneshot::Sender<Option<Vec<u8>>>,
    },
    FindValue {
        key_id: NodeId,
        exclude: Option<NodeId>,
        reply: oneshot::Sender<(Option<Vec<u8>>, Vec<Contact>)>,
    },
    Stats {
        reply: oneshot::Sender<(usize, usize)>,
    },
    Quit,
}

/// A Kademlia DHT node.
///
/// Handles are cheap to clone and all drive the same actor. The node is
/// generic over its RPC network; see [`Node::bind`] for the UDP flavor.
pub struct Node<N: KademliaRpc> {
    cmd_tx: mpsc::Sender<Command>,
    id: NodeId,
    addr: SocketAddr,
    network: Arc<N>,
    k: usize,
    alpha: usize,
}

impl<N: KademliaRpc> Clone for Node<N> {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            id: self.id,
            addr: self.addr,
            network: self.network.clone(),
            k: self.k,
            alpha: self.alpha,
        }
    }
}

struct NodeActor<N: KademliaRpc> {
    routing: RoutingTable,
    store: ValueStore,
    cmd_rx: mpsc::Receiver<Command>,
    cmd_tx: mpsc::Sender<Command>,
    network: Arc<N>,
}

impl<N: KademliaRpc> Node<N> {
    /// Spawn a node over an already-running network layer.
    pub fn new(id: NodeId, addr: SocketAddr, network: N, config: NodeConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(100);
        let network = Arc::new(network);

        let actor = NodeActor {
            routing: RoutingTable::new(id, config.k),
            store: ValueStore::default(),
            cmd_rx,
            cmd_tx: cmd_tx.clone(),
            network: network.clone(),
        };
        tokio::spawn(actor.run());

        Self {
            cmd_tx,
            id,
            addr,
            network,
            k: config.k,
            alpha: config.alpha,
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn local_contact(&self) -> Contact {
        Contact::new(self.id, self.addr)
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    /// Feed a contact into the routing table.
    pub async fn observe_contact(&self, contact: Contact) {
        let _ = self.cmd_tx.send(Command::Observe(contact)).await;
    }

    /// Number of contacts currently in the routing table.
    pub async fn contact_count(&self) -> usize {
        self.stats().await.0
    }

    /// Number of values held in the local store.
    pub async fn stored_keys(&self) -> usize {
        self.stats().await.1
    }

    async fn stats(&self) -> (usize, usize) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stats { reply: tx }).await.is_err() {
            return (0, 0);
        }
        rx.await.unwrap_or((0, 0))
    }

    /// The up-to-`n` contacts this node knows closest to `target`.
    pub async fn closest_contacts(&self, target: NodeId, n: usize) -> Vec<Contact> {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Closest {
                target,
                n,
                exclude: None,
                reply: tx,
            })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    async fn get_local(&self, key_id: NodeId) -> Option<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::GetLocal { key_id, reply: tx })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    async fn store_local(&self, key_id: NodeId, value: Vec<u8>) {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::StoreLocal {
                key_id,
                value,
                reply: tx,
            })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    // ------------------------------------------------------------------
    // Inbound RPC handlers. Every handler observes the requester first,
    // so a reply is never computed against a table that has not seen its
    // own requester.
    // ------------------------------------------------------------------

    pub async fn handle_ping(&self, from: Contact) -> NodeId {
        self.observe_contact(from).await;
        self.id
    }

    pub async fn handle_store(
        &self,
        from: Contact,
        key_id: NodeId,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> bool {
        self.observe_contact(from).await;
        if NodeId::from_key(&key) != key_id {
            warn!(
                claimed = %key_id,
                actual = %NodeId::from_key(&key),
                from = %from,
                "rejecting store: key identifier does not hash-match the key"
            );
            return false;
        }
        self.store_local(key_id, value).await;
        true
    }

    pub async fn handle_find_node(&self, from: Contact, target: NodeId) -> Vec<Contact> {
        self.observe_contact(from).await;
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Closest {
                target,
                n: self.k,
                exclude: Some(from.id),
                reply: tx,
            })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn handle_find_value(
        &self,
        from: Contact,
        key_id: NodeId,
    ) -> (Option<Vec<u8>>, Vec<Contact>) {
        self.observe_contact(from).await;
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::FindValue {
                key_id,
                exclude: Some(from.id),
                reply: tx,
            })
            .await
            .is_err()
        {
            return (None, Vec::new());
        }
        rx.await.unwrap_or((None, Vec::new()))
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    /// Probe a peer by address. On success the responder lands in the
    /// routing table; a timeout leaves the table untouched.
    pub async fn ping(
        &self,
        addr: SocketAddr,
        expected: Option<NodeId>,
    ) -> Result<NodeId, RpcError> {
        let responder = self.network.ping(addr, expected).await?;
        self.observe_contact(Contact::new(responder, addr)).await;
        Ok(responder)
    }

    /// Join the network: learn each seed's identifier with a ping, then
    /// look up our own identifier to populate the buckets along the local
    /// path.
    pub async fn bootstrap(&self, seeds: &[SocketAddr]) -> Result<Vec<Contact>> {
        let mut reached = 0usize;
        for &seed in seeds {
            match self.ping(seed, None).await {
                Ok(id) => {
                    debug!(seed = %seed, peer = %id, "bootstrap seed answered");
                    reached += 1;
                }
                Err(e) => warn!(seed = %seed, error = %e, "bootstrap seed unreachable"),
            }
        }
        if reached == 0 && !seeds.is_empty() {
            warn!("no bootstrap seed answered");
        }
        self.lookup_nodes(self.id).await
    }

    /// Store a key-value pair on the `k` peers closest to the key.
    ///
    /// Returns how many peers accepted the value. With an empty routing
    /// table the value is kept locally and the count is 1.
    pub async fn put(&self, key: &[u8], value: Vec<u8>) -> Result<usize> {
        let key_id = NodeId::from_key(key);
        let closest = self.lookup_nodes(key_id).await?;

        if closest.is_empty() {
            debug!(key = %key_id, "no peers known, storing locally");
            self.store_local(key_id, value).await;
            return Ok(1);
        }

        let mut join = JoinSet::new();
        for contact in closest {
            let network = self.network.clone();
            let key = key.to_vec();
            let value = value.clone();
            join.spawn(async move {
                (contact, network.store(&contact, key_id, key, value).await)
            });
        }

        let mut accepted = 0usize;
        while let Some(joined) = join.join_next().await {
            let Ok((contact, result)) = joined else { continue };
            match result {
                Ok(true) => {
                    self.observe_contact(contact).await;
                    accepted += 1;
                }
                Ok(false) => {
                    self.observe_contact(contact).await;
                    debug!(peer = %contact, "peer rejected store");
                }
                Err(e) => trace!(peer = %contact, error = %e, "store failed"),
            }
        }

        debug!(key = %key_id, accepted, "put complete");
        Ok(accepted)
    }

    /// Fetch a value by key: the local store first, then the network.
    ///
    /// A value found on the network is opportunistically replicated to the
    /// closest responder that did not have it.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let key_id = NodeId::from_key(key);
        if let Some(value) = self.get_local(key_id).await {
            return Ok(Some(value));
        }

        match self.lookup_value(key_id).await? {
            ValueLookup::Found { value, cache_to } => {
                if let Some(contact) = cache_to {
                    let network = self.network.clone();
                    let key = key.to_vec();
                    let cached = value.clone();
                    tokio::spawn(async move {
                        if let Err(e) = network.store(&contact, key_id, key, cached).await {
                            trace!(peer = %contact, error = %e, "cache store failed");
                        }
                    });
                }
                Ok(Some(value))
            }
            ValueLookup::NotFound { .. } => Ok(None),
        }
    }

    /// Iteratively find the `k` closest reachable contacts to `target`.
    ///
    /// Returns an empty list when the routing table offers no candidates
    /// at all.
    pub async fn lookup_nodes(&self, target: NodeId) -> Result<Vec<Contact>> {
        let seeds = self.closest_contacts(target, self.k).await;
        let mut shortlist = Shortlist::new(target, self.id, seeds);

        loop {
            let batch = shortlist.next_round(self.alpha, self.k);
            if batch.is_empty() {
                break;
            }

            let mut join = JoinSet::new();
            for contact in batch {
                let network = self.network.clone();
                join.spawn(async move { (contact, network.find_node(&contact, target).await) });
            }

            let mut round_best: Option<Distance> = None;
            while let Some(joined) = join.join_next().await {
                let Ok((contact, result)) = joined else { continue };
                match result {
                    Ok(contacts) => {
                        self.observe_contact(contact).await;
                        shortlist.settle(contact.id, true);
                        if let Some(closest_new) = shortlist.merge(contacts) {
                            round_best = Some(match round_best {
                                Some(best) if distance_cmp(&best, &closest_new).is_lt() => best,
                                _ => closest_new,
                            });
                        }
                    }
                    Err(e) => {
                        trace!(peer = %contact, error = %e, "lookup query failed");
                        shortlist.settle(contact.id, false);
                    }
                }
            }

            if !shortlist.round_made_progress(round_best) {
                break;
            }
        }

        let found = shortlist.responded(self.k);
        debug!(
            target = %target,
            found = found.len(),
            queried = shortlist.queried(),
            "node lookup complete"
        );
        Ok(found)
    }

    /// Iteratively search for a stored value, stopping at the first peer
    /// that returns it.
    pub async fn lookup_value(&self, key_id: NodeId) -> Result<ValueLookup> {
        let seeds = self.closest_contacts(key_id, self.k).await;
        let mut shortlist = Shortlist::new(key_id, self.id, seeds);

        loop {
            let batch = shortlist.next_round(self.alpha, self.k);
            if batch.is_empty() {
                break;
            }

            let mut join = JoinSet::new();
            for contact in batch {
                let network = self.network.clone();
                join.spawn(async move { (contact, network.find_value(&contact, key_id).await) });
            }

            let mut round_best: Option<Distance> = None;
            while let Some(joined) = join.join_next().await {
                let Ok((contact, result)) = joined else { continue };
                match result {
                    Ok(FindValueResult::Value(value)) => {
                        self.observe_contact(contact).await;
                        shortlist.settle(contact.id, true);
                        // First value wins; outstanding queries are dropped.
                        join.abort_all();
                        let cache_to = shortlist
                            .responded(self.k)
                            .into_iter()
                            .find(|c| c.id != contact.id);
                        debug!(key = %key_id, holder = %contact, "value found");
                        return Ok(ValueLookup::Found { value, cache_to });
                    }
                    Ok(FindValueResult::Closer(contacts)) => {
                        self.observe_contact(contact).await;
                        shortlist.settle(contact.id, true);
                        if let Some(closest_new) = shortlist.merge(contacts) {
                            round_best = Some(match round_best {
                                Some(best) if distance_cmp(&best, &closest_new).is_lt() => best,
                                _ => closest_new,
                            });
                        }
                    }
                    Err(e) => {
                        trace!(peer = %contact, error = %e, "value query failed");
                        shortlist.settle(contact.id, false);
                    }
                }
            }

            if !shortlist.round_made_progress(round_best) {
                break;
            }
        }

        debug!(key = %key_id, "value not found on any peer");
        Ok(ValueLookup::NotFound {
            closest: shortlist.responded(self.k),
        })
    }

    /// Stop the actor. Further operations fail quietly; in-flight calls
    /// settle on their own deadlines.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Quit).await;
    }
}

impl Node<UdpEndpoint> {
    /// Bind a UDP socket and start a node on it with default parameters.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind_with_config(addr, NodeConfig::default()).await
    }

    /// Bind a UDP socket and start a node on it.
    pub async fn bind_with_config(addr: SocketAddr, config: NodeConfig) -> Result<Self> {
        let id = NodeId::random();
        let endpoint = UdpEndpoint::bind(
            addr,
            id,
            RpcConfig {
                call_timeout: config.call_timeout,
            },
        )
        .await?;
        let local_addr = endpoint.local_addr()?;

        let node = Node::new(id, local_addr, endpoint.clone(), config);
        endpoint.start(Arc::new(UdpNodeHandler { node: node.clone() }));

        info!(id = %id, addr = %local_addr, "node listening");
        Ok(node)
    }

    /// Shut down transport and actor, in that order: pending calls fail
    /// with `TransportClosed` before the actor goes away.
    pub async fn close(&self) {
        self.network.close();
        self.shutdown().await;
    }
}

/// Glue between the UDP endpoint's inbound dispatch and the node's
/// handlers. The endpoint holds this for the node's lifetime.
struct UdpNodeHandler {
    node: Node<UdpEndpoint>,
}

#[async_trait]
impl InboundHandler for UdpNodeHandler {
    async fn observe(&self, contact: Contact) {
        self.node.observe_contact(contact).await;
    }

    async fn handle(&self, from: Contact, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong {
                id: self.node.handle_ping(from).await,
            },
            Request::Store { key_id, key, value } => Response::Stored {
                accepted: self.node.handle_store(from, key_id, key, value).await,
            },
            Request::FindNode { target } => Response::Nodes {
                contacts: self.node.handle_find_node(from, target).await,
            },
            Request::FindValue { target } => {
                match self.node.handle_find_value(from, target).await {
                    (Some(value), _) => Response::Value { value },
                    (None, contacts) => Response::CloserNodes { contacts },
                }
            }
        }
    }
}

impl<N: KademliaRpc> NodeActor<N> {
    async fn run(mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                Command::Observe(contact) => self.handle_observe(contact),
                Command::ApplyChallenge {
                    head,
                    newcomer,
                    alive,
                } => self.routing.apply_challenge(head, newcomer, alive),
                Command::Closest {
                    target,
                    n,
                    exclude,
                    reply,
                } => {
                    let _ = reply.send(self.closest(target, n, exclude));
                }
                Command::StoreLocal {
                    key_id,
                    value,
                    reply,
                } => {
                    self.store.insert(key_id, value);
                    let _ = reply.send(());
                }
                Command::GetLocal { key_id, reply } => {
                    let _ = reply.send(self.store.get(&key_id));
                }
                Command::FindValue {
                    key_id,
                    exclude,
                    reply,
                } => {
                    let answer = match self.store.get(&key_id) {
                        Some(value) => (Some(value), Vec::new()),
                        None => (None, self.closest(key_id, self.routing.k(), exclude)),
                    };
                    let _ = reply.send(answer);
                }
                Command::Stats { reply } => {
                    let _ = reply.send((self.routing.contact_count(), self.store.len()));
                }
                Command::Quit => break,
            }
        }
    }

    fn closest(&self, target: NodeId, n: usize, exclude: Option<NodeId>) -> Vec<Contact> {
        match exclude {
            None => self.routing.closest_to(&target, n),
            Some(excluded) => {
                let mut found = self.routing.closest_to(&target, n + 1);
                found.retain(|c| c.id != excluded);
                found.truncate(n);
                found
            }
        }
    }

    /// Insert or refresh a contact; a full bucket turns into a challenge
    /// ping against its stalest member, settled back through the command
    /// channel so the table is never held across I/O.
    fn handle_observe(&mut self, contact: Contact) {
        if let ObserveOutcome::Challenge(challenge) = self.routing.observe(contact) {
            let network = self.network.clone();
            let cmd_tx = self.cmd_tx.clone();
            tokio::spawn(async move {
                let alive = matches!(
                    network
                        .ping(challenge.head.addr, Some(challenge.head.id))
                        .await,
                    Ok(id) if id == challenge.head.id
                );
                let _ = cmd_tx
                    .send(Command::ApplyChallenge {
                        head: challenge.head.id,
                        newcomer: challenge.newcomer,
                        alive,
                    })
                    .await;
            });
        }
    }
}

// ----------------------------------------------------------------------
// Shortlist: the working set of an iterative lookup
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateState {
    Unqueried,
    InFlight,
    Responded,
    Failed,
}

#[derive(Debug)]
struct Candidate {
    contact: Contact,
    distance: Distance,
    state: CandidateState,
}

/// Candidates of one lookup, deduplicated by identifier and kept sorted
/// ascending by XOR distance to the target.
struct Shortlist {
    target: NodeId,
    local: NodeId,
    entries: Vec<Candidate>,
}

impl Shortlist {
    fn new(target: NodeId, local: NodeId, seeds: Vec<Contact>) -> Self {
        let mut list = Self {
            target,
            local,
            entries: Vec::new(),
        };
        list.merge(seeds);
        list
    }

    /// Insert unseen contacts, preserving order. Returns the distance of
    /// the closest newly-added candidate, if any.
    fn merge(&mut self, contacts: Vec<Contact>) -> Option<Distance> {
        let mut closest_new: Option<Distance> = None;
        for contact in contacts {
            if contact.id == self.local {
                continue;
            }
            if self.entries.iter().any(|c| c.contact.id == contact.id) {
                continue;
            }
            let distance = contact.id.xor_distance(&self.target);
            let pos = self
                .entries
                .partition_point(|c| distance_cmp(&c.distance, &distance).is_lt());
            self.entries.insert(
                pos,
                Candidate {
                    contact,
                    distance,
                    state: CandidateState::Unqueried,
                },
            );
            closest_new = Some(match closest_new {
                Some(best) if distance_cmp(&best, &distance).is_lt() => best,
                _ => distance,
            });
        }
        closest_new
    }

    /// Up to `alpha` unqueried candidates among the `k` closest, marked
    /// in-flight. An empty batch means the top of the shortlist has fully
    /// settled.
    fn next_round(&mut self, alpha: usize, k: usize) -> Vec<Contact> {
        let mut batch = Vec::new();
        for candidate in self.entries.iter_mut().take(k) {
            if batch.len() == alpha {
                break;
            }
            if candidate.state == CandidateState::Unqueried {
                candidate.state = CandidateState::InFlight;
                batch.push(candidate.contact);
            }
        }
        batch
    }

    fn settle(&mut self, id: NodeId, responded: bool) {
        if let Some(candidate) = self.entries.iter_mut().find(|c| c.contact.id == id) {
            candidate.state = if responded {
                CandidateState::Responded
            } else {
                CandidateState::Failed
            };
        }
    }

    /// Distance of the closest candidate that has responded.
    fn best_responded(&self) -> Option<Distance> {
        self.entries
            .iter()
            .find(|c| c.state == CandidateState::Responded)
            .map(|c| c.distance)
    }

    /// Whether the just-finished round justifies another: it discovered a
    /// candidate strictly closer than the best responder so far. Before
    /// anyone has responded every round counts as progress.
    fn round_made_progress(&self, round_best: Option<Distance>) -> bool {
        match (round_best, self.best_responded()) {
            (_, None) => true,
            (Some(new), Some(best)) => distance_cmp(&new, &best).is_lt(),
            (None, Some(_)) => false,
        }
    }

    /// The up-to-`k` closest responded contacts, ascending by distance.
    fn responded(&self, k: usize) -> Vec<Contact> {
        self.entries
            .iter()
            .filter(|c| c.state == CandidateState::Responded)
            .take(k)
            .map(|c| c.contact)
            .collect()
    }

    fn queried(&self) -> usize {
        self.entries
            .iter()
            .filter(|c| c.state != CandidateState::Unqueried)
            .count()
    }
}
