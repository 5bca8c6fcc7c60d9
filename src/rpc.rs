//! # UDP RPC Endpoint
//!
//! Request/response correlation over a datagram socket. Every outbound call
//! draws a random 64-bit token, parks a one-shot rendezvous in the pending
//! table, and settles exactly once: with the matched reply, with
//! [`RpcError::Timeout`] when the deadline passes, or with
//! [`RpcError::TransportClosed`] once the endpoint shuts down.
//!
//! The receive loop decodes each datagram, feeds the sender's contact to the
//! [`InboundHandler`] *before* anything else (so a caller that sees a reply
//! also sees the routing-table update), then either dispatches a request on
//! its own task or resolves the matching pending call. Malformed datagrams
//! are logged and dropped; a well-framed request naming an unknown method is
//! answered with an `"error"` response carrying the same token. Spurious or
//! late replies are discarded.
//!
//! A single timeout never removes anyone from the routing table — that
//! decision belongs to the routing layer's eviction challenge.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, trace, warn};

use crate::identity::{Contact, NodeId};
use crate::messages::{Envelope, Payload, Request, Response, WireError};
use crate::protocols::{FindValueResult, KademliaRpc};

/// Default deadline for a single RPC.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced to the caller of a single RPC.
#[derive(Debug, Error)]
pub enum RpcError {
    /// No reply arrived within the per-call deadline.
    #[error("request timed out")]
    Timeout,

    /// The local endpoint is closed; pending and future calls all fail.
    #[error("transport closed")]
    TransportClosed,

    /// Socket-level failure sending the request.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer answered with something that does not fit the request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer answered with an explicit error response.
    #[error("peer error: {0}")]
    Remote(String),
}

/// Endpoint tuning knobs.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Per-call reply deadline.
    pub call_timeout: Duration,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Consumer of inbound traffic: the node's dispatch table.
///
/// The endpoint holds this behind an `Arc` for its own lifetime; the node
/// owns the endpoint and closes it before dropping, so the reference never
/// dangles.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    /// Called for every well-formed datagram before it is acted on.
    async fn observe(&self, contact: Contact);

    /// Serve one request; the returned response is sent back verbatim.
    async fn handle(&self, from: Contact, request: Request) -> Response;
}

/// A matched reply, as delivered to the caller.
#[derive(Debug)]
pub struct Reply {
    pub responder: NodeId,
    pub from: SocketAddr,
    /// True when the caller expected a particular responder identifier and
    /// the reply's sender differs. The reply is delivered regardless.
    pub mismatched: bool,
    pub response: Response,
}

struct PendingCall {
    expected: Option<NodeId>,
    reply: oneshot::Sender<Reply>,
}

struct Shared {
    socket: UdpSocket,
    local_id: NodeId,
    config: RpcConfig,
    pending: Mutex<HashMap<u64, PendingCall>>,
    closed: AtomicBool,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

/// A bound UDP RPC endpoint. Cheap to clone; all clones share the socket
/// and the pending-call table.
#[derive(Clone)]
pub struct UdpEndpoint {
    shared: Arc<Shared>,
}

impl UdpEndpoint {
    /// Bind a socket and prepare the endpoint. No traffic is processed
    /// until [`start`](Self::start) installs the inbound handler.
    pub async fn bind(
        addr: SocketAddr,
        local_id: NodeId,
        config: RpcConfig,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            shared: Arc::new(Shared {
                socket,
                local_id,
                config,
                pending: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                recv_task: Mutex::new(None),
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.shared.socket.local_addr()
    }

    pub fn local_id(&self) -> NodeId {
        self.shared.local_id
    }

    /// Spawn the receive loop, dispatching inbound traffic to `handler`.
    pub fn start(&self, handler: Arc<dyn InboundHandler>) {
        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let (len, from) = match shared.socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        if shared.closed.load(Ordering::SeqCst) {
                            break;
                        }
                        warn!(error = %e, "udp receive failed");
                        continue;
                    }
                };
                Self::dispatch(&shared, &handler, &buf[..len], from).await;
            }
        });
        *self.shared.recv_task.lock().unwrap() = Some(task);
    }

    async fn dispatch(
        shared: &Arc<Shared>,
        handler: &Arc<dyn InboundHandler>,
        datagram: &[u8],
        from: SocketAddr,
    ) {
        let envelope = match Envelope::decode(datagram) {
            Ok(envelope) => envelope,
            Err(WireError::UnknownMethod {
                token,
                method,
                request: true,
            }) => {
                debug!(%from, method = %method, "request for unknown method");
                let reply = Envelope::response(
                    token,
                    shared.local_id,
                    Response::Error {
                        message: format!("unknown method: {method}"),
                    },
                );
                if let Err(e) = shared.socket.send_to(&reply.encode(), from).await {
                    debug!(%from, error = %e, "failed to send error response");
                }
                return;
            }
            // Unknown-method responses get the same treatment as any other
            // unmatched reply: dropped, never answered.
            Err(e) => {
                debug!(%from, error = %e, "dropping malformed datagram");
                return;
            }
        };

        // Table update first: whoever awaits this datagram must find the
        // sender already observed.
        let contact = Contact::new(envelope.sender, from);
        handler.observe(contact).await;

        match envelope.payload {
            Payload::Request(request) => {
                trace!(%from, method = request.method(), token = envelope.token, "request");
                let shared = shared.clone();
                let handler = handler.clone();
                let token = envelope.token;
                tokio::spawn(async move {
                    let response = handler.handle(contact, request).await;
                    let reply = Envelope::response(token, shared.local_id, response);
                    if let Err(e) = shared.socket.send_to(&reply.encode(), from).await {
                        debug!(%from, error = %e, "failed to send response");
                    }
                });
            }
            Payload::Response(response) => {
                let call = shared.pending.lock().unwrap().remove(&envelope.token);
                let Some(call) = call else {
                    debug!(%from, token = envelope.token, "spurious reply discarded");
                    return;
                };
                let mismatched = call
                    .expected
                    .is_some_and(|expected| expected != envelope.sender);
                if mismatched {
                    warn!(
                        %from,
                        expected = ?call.expected,
                        got = %envelope.sender,
                        "responder identifier mismatch"
                    );
                }
                let _ = call.reply.send(Reply {
                    responder: envelope.sender,
                    from,
                    mismatched,
                    response,
                });
            }
        }
    }

    /// Send one request and await its correlated reply.
    pub async fn call(
        &self,
        to: SocketAddr,
        expected: Option<NodeId>,
        request: Request,
    ) -> Result<Reply, RpcError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(RpcError::TransportClosed);
        }

        let (tx, rx) = oneshot::channel();
        let token = {
            let mut pending = self.shared.pending.lock().unwrap();
            let mut token = rand::random::<u64>();
            while pending.contains_key(&token) {
                token = rand::random::<u64>();
            }
            pending.insert(token, PendingCall { expected, reply: tx });
            token
        };

        let datagram = Envelope::request(token, self.shared.local_id, request).encode();
        if let Err(e) = self.shared.socket.send_to(&datagram, to).await {
            self.shared.pending.lock().unwrap().remove(&token);
            return Err(RpcError::Io(e));
        }

        match timeout(self.shared.config.call_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Sender dropped without resolving: the endpoint was closed.
            Ok(Err(_)) => Err(RpcError::TransportClosed),
            Err(_) => {
                self.shared.pending.lock().unwrap().remove(&token);
                trace!(%to, token, "call timed out");
                Err(RpcError::Timeout)
            }
        }
    }

    /// Shut the endpoint down: stop the receive loop and fail every pending
    /// call with [`RpcError::TransportClosed`]. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.shared.recv_task.lock().unwrap().take() {
            task.abort();
        }
        // Dropping the rendezvous senders resolves every waiter with
        // TransportClosed.
        self.shared.pending.lock().unwrap().clear();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KademliaRpc for UdpEndpoint {
    async fn ping(&self, to: SocketAddr, expected: Option<NodeId>) -> Result<NodeId, RpcError> {
        let reply = self.call(to, expected, Request::Ping).await?;
        match reply.response {
            Response::Pong { id } => Ok(id),
            Response::Error { message } => Err(RpcError::Remote(message)),
            other => Err(RpcError::Protocol(format!(
                "unexpected reply to ping: {other:?}"
            ))),
        }
    }

    async fn store(
        &self,
        to: &Contact,
        key_id: NodeId,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> Result<bool, RpcError> {
        let request = Request::Store { key_id, key, value };
        let reply = self.call(to.addr, Some(to.id), request).await?;
        match reply.response {
            Response::Stored { accepted } => Ok(accepted),
            Response::Error { message } => Err(RpcError::Remote(message)),
            other => Err(RpcError::Protocol(format!(
                "unexpected reply to store: {other:?}"
            ))),
        }
    }

    async fn find_node(&self, to: &Contact, target: NodeId) -> Result<Vec<Contact>, RpcError> {
        let reply = self
            .call(to.addr, Some(to.id), Request::FindNode { target })
            .await?;
        match reply.response {
            Response::Nodes { contacts } => Ok(contacts),
            Response::Error { message } => Err(RpcError::Remote(message)),
            other => Err(RpcError::Protocol(format!(
                "unexpected reply to find_node: {other:?}"
            ))),
        }
    }

    async fn find_value(
        &self,
        to: &Contact,
        key_id: NodeId,
    ) -> Result<FindValueResult, RpcError> {
        let reply = self
            .call(to.addr, Some(to.id), Request::FindValue { target: key_id })
            .await?;
        match reply.response {
            Response::Value { value } => Ok(FindValueResult::Value(value)),
            Response::CloserNodes { contacts } => Ok(FindValueResult::Closer(contacts)),
            Response::Error { message } => Err(RpcError::Remote(message)),
            other => Err(RpcError::Protocol(format!(
                "unexpected reply to find_value: {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingHandler {
        id: NodeId,
        observed: StdMutex<Vec<Contact>>,
    }

    impl RecordingHandler {
        fn new(id: NodeId) -> Arc<Self> {
            Arc::new(Self {
                id,
                observed: StdMutex::new(Vec::new()),
            })
        }

        fn observed(&self) -> Vec<Contact> {
            self.observed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InboundHandler for RecordingHandler {
        async fn observe(&self, contact: Contact) {
            self.observed.lock().unwrap().push(contact);
        }

        async fn handle(&self, _from: Contact, request: Request) -> Response {
            match request {
                Request::Ping => Response::Pong { id: self.id },
                Request::Store { .. } => Response::Stored { accepted: true },
                Request::FindNode { .. } => Response::Nodes { contacts: vec![] },
                Request::FindValue { .. } => Response::CloserNodes { contacts: vec![] },
            }
        }
    }

    async fn endpoint(config: RpcConfig) -> (UdpEndpoint, Arc<RecordingHandler>) {
        let id = NodeId::random();
        let ep = UdpEndpoint::bind("127.0.0.1:0".parse().unwrap(), id, config)
            .await
            .unwrap();
        let handler = RecordingHandler::new(id);
        ep.start(handler.clone());
        (ep, handler)
    }

    #[tokio::test]
    async fn call_resolves_with_the_correlated_reply() {
        let (a, _) = endpoint(RpcConfig::default()).await;
        let (b, b_handler) = endpoint(RpcConfig::default()).await;
        let b_addr = b.local_addr().unwrap();

        let reply = a.call(b_addr, Some(b.local_id()), Request::Ping).await.unwrap();
        assert!(!reply.mismatched);
        assert_eq!(reply.responder, b.local_id());
        assert_eq!(reply.response, Response::Pong { id: b.local_id() });

        // B observed A's contact before replying.
        let observed = b_handler.observed();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].id, a.local_id());
    }

    #[tokio::test]
    async fn unanswered_call_times_out_and_clears_the_pending_table() {
        let (a, _) = endpoint(RpcConfig {
            call_timeout: Duration::from_millis(100),
        })
        .await;
        // A bound socket with no started endpoint never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let err = a
            .call(silent.local_addr().unwrap(), None, Request::Ping)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout));
        assert!(a.shared.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_fails_pending_and_future_calls() {
        let (a, _) = endpoint(RpcConfig {
            call_timeout: Duration::from_secs(30),
        })
        .await;
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = silent.local_addr().unwrap();

        let a2 = a.clone();
        let in_flight =
            tokio::spawn(async move { a2.call(silent_addr, None, Request::Ping).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        a.close();
        let err = in_flight.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::TransportClosed));

        let err = a.call(silent_addr, None, Request::Ping).await.unwrap_err();
        assert!(matches!(err, RpcError::TransportClosed));
    }

    #[tokio::test]
    async fn spurious_replies_are_discarded_but_still_observed() {
        let (a, a_handler) = endpoint(RpcConfig::default()).await;
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let stranger_id = NodeId::random();

        let bogus = Envelope::response(
            0x5151_5151,
            stranger_id,
            Response::Pong { id: stranger_id },
        );
        stranger
            .send_to(&bogus.encode(), a.local_addr().unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let observed = a_handler.observed();
        assert_eq!(observed.len(), 1);
        assert_eq!(observed[0].id, stranger_id);
    }

    #[tokio::test]
    async fn responder_identifier_mismatch_is_flagged() {
        let (a, _) = endpoint(RpcConfig::default()).await;
        let (b, _) = endpoint(RpcConfig::default()).await;

        let reply = a
            .call(
                b.local_addr().unwrap(),
                Some(NodeId::random()),
                Request::Ping,
            )
            .await
            .unwrap();
        assert!(reply.mismatched);
        assert_eq!(reply.responder, b.local_id());
    }

    #[tokio::test]
    async fn unknown_methods_get_an_error_response_with_the_same_token() {
        let (a, _) = endpoint(RpcConfig::default()).await;
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // Hand-build a request for a method this node does not speak.
        let mut raw = Vec::new();
        raw.push(crate::messages::MESSAGE_TYPE_REQUEST);
        raw.extend_from_slice(&0x0042_4242u64.to_be_bytes());
        raw.extend_from_slice(NodeId::random().as_bytes());
        raw.push(6);
        raw.extend_from_slice(b"gossip");
        stranger
            .send_to(&raw, a.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), stranger.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let envelope = Envelope::decode(&buf[..len]).unwrap();
        assert_eq!(envelope.token, 0x0042_4242);
        assert!(matches!(
            envelope.payload,
            Payload::Response(Response::Error { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_method_responses_are_dropped_without_a_reply() {
        let (a, _) = endpoint(RpcConfig::default()).await;
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        // A response-typed datagram with a bogus method: answering it would
        // hand an attacker a one-packet reflection primitive.
        let mut raw = Vec::new();
        raw.push(crate::messages::MESSAGE_TYPE_RESPONSE);
        raw.extend_from_slice(&0x0042_4242u64.to_be_bytes());
        raw.extend_from_slice(NodeId::random().as_bytes());
        raw.push(6);
        raw.extend_from_slice(b"gossip");
        stranger
            .send_to(&raw, a.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        let silence =
            tokio::time::timeout(Duration::from_millis(300), stranger.recv_from(&mut buf)).await;
        assert!(silence.is_err(), "endpoint must not answer a response");
    }

    #[tokio::test]
    async fn malformed_datagrams_are_ignored() {
        let (a, a_handler) = endpoint(RpcConfig::default()).await;
        let (b, _) = endpoint(RpcConfig::default()).await;
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        stranger
            .send_to(&[0xFF, 0x00, 0x13], a.local_addr().unwrap())
            .await
            .unwrap();

        // The endpoint keeps serving after garbage, and garbage is never
        // observed as a contact.
        let reply = a.call(b.local_addr().unwrap(), None, Request::Ping).await;
        assert!(reply.is_ok());
        assert_eq!(a_handler.observed().len(), 1);
    }
}
