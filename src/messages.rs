//! # Datagram Wire Format
//!
//! Every RPC message travels in a single UDP datagram with this layout:
//!
//! | Field             | Size      | Notes                                   |
//! |-------------------|-----------|-----------------------------------------|
//! | message type      | 1 byte    | `0x00` request, `0x01` response         |
//! | correlation token | 8 bytes   | big-endian, matches replies to requests |
//! | sender identifier | 20 bytes  |                                         |
//! | method name       | 1 + n     | u8 length prefix, ASCII, max 16 chars   |
//! | payload           | variable  | method specific, see below              |
//!
//! Response messages mirror the request's method name (or carry `"error"`).
//! Contact lists are a u8 count followed by `20-byte id + 1-byte address
//! family (4 or 6) + 4/16-byte address + u16 port`, all big-endian. Key,
//! value, and error-string payloads carry u16 length prefixes.
//!
//! A `find_value` response starts with a tag byte: `0` for a contact list,
//! `1` for the value itself — never both.
//!
//! Decoding is strict: truncated buffers, unknown tags, oversized fields,
//! and trailing garbage are all rejected. An unknown method name is
//! reported together with its correlation token and direction, so the
//! dispatcher can answer an unknown *request* with an error response while
//! discarding an unknown *response* outright.

use std::net::{IpAddr, SocketAddr};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::identity::{Contact, NodeId, ID_LEN};

/// Wire tag for request messages.
pub const MESSAGE_TYPE_REQUEST: u8 = 0x00;
/// Wire tag for response messages.
pub const MESSAGE_TYPE_RESPONSE: u8 = 0x01;

/// Maximum length of a method name on the wire.
pub const MAX_METHOD_LEN: usize = 16;
/// Maximum length of application key bytes in a store request.
pub const MAX_KEY_LEN: usize = 1024;
/// Maximum length of a stored value.
pub const MAX_VALUE_LEN: usize = 4096;

/// Errors raised while encoding or decoding datagrams.
#[derive(Debug, Error)]
pub enum WireError {
    /// The buffer ended before the advertised field did.
    #[error("truncated message")]
    Truncated,

    /// Unrecognized message type byte.
    #[error("invalid message type: {0:#04x}")]
    InvalidMessageType(u8),

    /// Method name over 16 bytes or not ASCII.
    #[error("invalid method name")]
    InvalidMethodName,

    /// Well-framed message naming a method this node does not speak.
    /// Carries the token and direction: the dispatcher answers an unknown
    /// request with an error response, but discards an unknown response
    /// like any other unmatched reply.
    #[error("unknown method: {method}")]
    UnknownMethod {
        token: u64,
        method: String,
        request: bool,
    },

    /// Unrecognized address family byte in a contact list.
    #[error("invalid address family: {0}")]
    InvalidFamily(u8),

    /// A boolean field held something other than 0 or 1.
    #[error("invalid boolean: {0:#04x}")]
    InvalidBoolean(u8),

    /// Unrecognized find_value response tag.
    #[error("invalid result tag: {0:#04x}")]
    InvalidTag(u8),

    /// A length-prefixed field exceeded its limit.
    #[error("field of {got} bytes exceeds limit of {limit}")]
    FieldTooLong { got: usize, limit: usize },

    /// Bytes left over after the payload was fully parsed.
    #[error("trailing bytes after message")]
    TrailingBytes,

    /// Error-response message was not valid UTF-8.
    #[error("error message not utf-8")]
    BadErrorText,
}

/// The four request payloads of the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    Store {
        key_id: NodeId,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    FindNode {
        target: NodeId,
    },
    FindValue {
        target: NodeId,
    },
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Store { .. } => "store",
            Request::FindNode { .. } => "find_node",
            Request::FindValue { .. } => "find_value",
        }
    }
}

/// Response payloads, one per method plus the error reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Reply to `ping`: the responder's identifier.
    Pong { id: NodeId },
    /// Reply to `store`: whether the value was accepted.
    Stored { accepted: bool },
    /// Reply to `find_node`: the closest known contacts.
    Nodes { contacts: Vec<Contact> },
    /// Reply to `find_value` that did not hold the value.
    CloserNodes { contacts: Vec<Contact> },
    /// Reply to `find_value` that held the value.
    Value { value: Vec<u8> },
    /// Request could not be served (unknown method, handler failure).
    Error { message: String },
}

impl Response {
    pub fn method(&self) -> &'static str {
        match self {
            Response::Pong { .. } => "ping",
            Response::Stored { .. } => "store",
            Response::Nodes { .. } => "find_node",
            Response::CloserNodes { .. } | Response::Value { .. } => "find_value",
            Response::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Request(Request),
    Response(Response),
}

/// One fully-parsed datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub token: u64,
    pub sender: NodeId,
    pub payload: Payload,
}

impl Envelope {
    pub fn request(token: u64, sender: NodeId, request: Request) -> Self {
        Self {
            token,
            sender,
            payload: Payload::Request(request),
        }
    }

    pub fn response(token: u64, sender: NodeId, response: Response) -> Self {
        Self {
            token,
            sender,
            payload: Payload::Response(response),
        }
    }

    /// Encodes the message into a single datagram payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);

        let (type_byte, method) = match &self.payload {
            Payload::Request(r) => (MESSAGE_TYPE_REQUEST, r.method()),
            Payload::Response(r) => (MESSAGE_TYPE_RESPONSE, r.method()),
        };
        buf.put_u8(type_byte);
        buf.put_u64(self.token);
        buf.put_slice(self.sender.as_bytes());
        buf.put_u8(method.len() as u8);
        buf.put_slice(method.as_bytes());

        match &self.payload {
            Payload::Request(Request::Ping) => {}
            Payload::Request(Request::Store { key_id, key, value }) => {
                buf.put_slice(key_id.as_bytes());
                put_blob(&mut buf, key);
                put_blob(&mut buf, value);
            }
            Payload::Request(Request::FindNode { target })
            | Payload::Request(Request::FindValue { target }) => {
                buf.put_slice(target.as_bytes());
            }
            Payload::Response(Response::Pong { id }) => {
                buf.put_slice(id.as_bytes());
            }
            Payload::Response(Response::Stored { accepted }) => {
                buf.put_u8(u8::from(*accepted));
            }
            Payload::Response(Response::Nodes { contacts }) => {
                put_contacts(&mut buf, contacts);
            }
            Payload::Response(Response::CloserNodes { contacts }) => {
                buf.put_u8(0);
                put_contacts(&mut buf, contacts);
            }
            Payload::Response(Response::Value { value }) => {
                buf.put_u8(1);
                put_blob(&mut buf, value);
            }
            Payload::Response(Response::Error { message }) => {
                let text = &message.as_bytes()[..message.len().min(u16::MAX as usize)];
                buf.put_u16(text.len() as u16);
                buf.put_slice(text);
            }
        }

        buf.freeze()
    }

    /// Parses one datagram.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut buf = data;

        let type_byte = get_u8(&mut buf)?;
        if type_byte != MESSAGE_TYPE_REQUEST && type_byte != MESSAGE_TYPE_RESPONSE {
            return Err(WireError::InvalidMessageType(type_byte));
        }
        let token = get_u64(&mut buf)?;
        let sender = get_id(&mut buf)?;
        let method = get_method(&mut buf)?;

        let payload = if type_byte == MESSAGE_TYPE_REQUEST {
            let request = match method.as_str() {
                "ping" => Request::Ping,
                "store" => {
                    let key_id = get_id(&mut buf)?;
                    let key = get_blob(&mut buf, MAX_KEY_LEN)?;
                    let value = get_blob(&mut buf, MAX_VALUE_LEN)?;
                    Request::Store { key_id, key, value }
                }
                "find_node" => Request::FindNode {
                    target: get_id(&mut buf)?,
                },
                "find_value" => Request::FindValue {
                    target: get_id(&mut buf)?,
                },
                _ => {
                    return Err(WireError::UnknownMethod {
                        token,
                        method,
                        request: true,
                    })
                }
            };
            Payload::Request(request)
        } else {
            let response = match method.as_str() {
                "ping" => Response::Pong {
                    id: get_id(&mut buf)?,
                },
                "store" => Response::Stored {
                    accepted: get_bool(&mut buf)?,
                },
                "find_node" => Response::Nodes {
                    contacts: get_contacts(&mut buf)?,
                },
                "find_value" => match get_u8(&mut buf)? {
                    0 => Response::CloserNodes {
                        contacts: get_contacts(&mut buf)?,
                    },
                    1 => Response::Value {
                        value: get_blob(&mut buf, MAX_VALUE_LEN)?,
                    },
                    tag => return Err(WireError::InvalidTag(tag)),
                },
                "error" => {
                    let text = get_blob(&mut buf, u16::MAX as usize)?;
                    Response::Error {
                        message: String::from_utf8(text)
                            .map_err(|_| WireError::BadErrorText)?,
                    }
                }
                _ => {
                    return Err(WireError::UnknownMethod {
                        token,
                        method,
                        request: false,
                    })
                }
            };
            Payload::Response(response)
        };

        if buf.has_remaining() {
            return Err(WireError::TrailingBytes);
        }

        Ok(Envelope {
            token,
            sender,
            payload,
        })
    }
}

fn put_blob(buf: &mut BytesMut, bytes: &[u8]) {
    debug_assert!(bytes.len() <= u16::MAX as usize);
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
}

fn put_contacts(buf: &mut BytesMut, contacts: &[Contact]) {
    debug_assert!(contacts.len() <= u8::MAX as usize);
    buf.put_u8(contacts.len() as u8);
    for contact in contacts {
        buf.put_slice(contact.id.as_bytes());
        match contact.addr.ip() {
            IpAddr::V4(ip) => {
                buf.put_u8(4);
                buf.put_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                buf.put_u8(6);
                buf.put_slice(&ip.octets());
            }
        }
        buf.put_u16(contact.addr.port());
    }
}

fn get_u8(buf: &mut &[u8]) -> Result<u8, WireError> {
    if buf.remaining() < 1 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut &[u8]) -> Result<u16, WireError> {
    if buf.remaining() < 2 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_u16())
}

fn get_u64(buf: &mut &[u8]) -> Result<u64, WireError> {
    if buf.remaining() < 8 {
        return Err(WireError::Truncated);
    }
    Ok(buf.get_u64())
}

fn get_bool(buf: &mut &[u8]) -> Result<bool, WireError> {
    match get_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(WireError::InvalidBoolean(other)),
    }
}

fn get_id(buf: &mut &[u8]) -> Result<NodeId, WireError> {
    if buf.remaining() < ID_LEN {
        return Err(WireError::Truncated);
    }
    let mut bytes = [0u8; ID_LEN];
    buf.copy_to_slice(&mut bytes);
    Ok(NodeId::from_bytes(bytes))
}

fn get_method(buf: &mut &[u8]) -> Result<String, WireError> {
    let len = get_u8(buf)? as usize;
    if len == 0 || len > MAX_METHOD_LEN {
        return Err(WireError::InvalidMethodName);
    }
    if buf.remaining() < len {
        return Err(WireError::Truncated);
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    if !bytes.is_ascii() {
        return Err(WireError::InvalidMethodName);
    }
    String::from_utf8(bytes).map_err(|_| WireError::InvalidMethodName)
}

fn get_blob(buf: &mut &[u8], limit: usize) -> Result<Vec<u8>, WireError> {
    let len = get_u16(buf)? as usize;
    if len > limit {
        return Err(WireError::FieldTooLong { got: len, limit });
    }
    if buf.remaining() < len {
        return Err(WireError::Truncated);
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

fn get_contacts(buf: &mut &[u8]) -> Result<Vec<Contact>, WireError> {
    let count = get_u8(buf)? as usize;
    let mut contacts = Vec::with_capacity(count);
    for _ in 0..count {
        let id = get_id(buf)?;
        let ip = match get_u8(buf)? {
            4 => {
                if buf.remaining() < 4 {
                    return Err(WireError::Truncated);
                }
                let mut octets = [0u8; 4];
                buf.copy_to_slice(&mut octets);
                IpAddr::from(octets)
            }
            6 => {
                if buf.remaining() < 16 {
                    return Err(WireError::Truncated);
                }
                let mut octets = [0u8; 16];
                buf.copy_to_slice(&mut octets);
                IpAddr::from(octets)
            }
            family => return Err(WireError::InvalidFamily(family)),
        };
        let port = get_u16(buf)?;
        contacts.push(Contact::new(id, SocketAddr::new(ip, port)));
    }
    Ok(contacts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_v4(seed: u8) -> Contact {
        Contact::new(
            NodeId::from_key(&[seed]),
            format!("10.0.0.{seed}:{}", 9000 + seed as u16).parse().unwrap(),
        )
    }

    fn contact_v6(seed: u8) -> Contact {
        Contact::new(
            NodeId::from_key(&[seed, seed]),
            format!("[2001:db8::{seed:x}]:{}", 9000 + seed as u16)
                .parse()
                .unwrap(),
        )
    }

    fn round_trip(envelope: Envelope) {
        let encoded = envelope.encode();
        let decoded = Envelope::decode(&encoded).expect("decodes");
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn requests_round_trip() {
        let sender = NodeId::random();
        round_trip(Envelope::request(1, sender, Request::Ping));
        round_trip(Envelope::request(
            2,
            sender,
            Request::Store {
                key_id: NodeId::from_key(b"k"),
                key: b"k".to_vec(),
                value: b"some value".to_vec(),
            },
        ));
        round_trip(Envelope::request(
            3,
            sender,
            Request::FindNode {
                target: NodeId::random(),
            },
        ));
        round_trip(Envelope::request(
            u64::MAX,
            sender,
            Request::FindValue {
                target: NodeId::random(),
            },
        ));
    }

    #[test]
    fn responses_round_trip() {
        let sender = NodeId::random();
        round_trip(Envelope::response(7, sender, Response::Pong { id: sender }));
        round_trip(Envelope::response(
            8,
            sender,
            Response::Stored { accepted: true },
        ));
        round_trip(Envelope::response(
            9,
            sender,
            Response::Nodes {
                contacts: vec![contact_v4(1), contact_v6(2), contact_v4(3)],
            },
        ));
        round_trip(Envelope::response(
            10,
            sender,
            Response::CloserNodes { contacts: vec![] },
        ));
        round_trip(Envelope::response(
            11,
            sender,
            Response::Value {
                value: vec![0xAB; MAX_VALUE_LEN],
            },
        ));
        round_trip(Envelope::response(
            12,
            sender,
            Response::Error {
                message: "unknown method".into(),
            },
        ));
    }

    #[test]
    fn framing_layout_is_as_documented() {
        let sender = NodeId::from_bytes([0x11; 20]);
        let encoded = Envelope::request(0x0102030405060708, sender, Request::Ping).encode();
        assert_eq!(encoded[0], MESSAGE_TYPE_REQUEST);
        assert_eq!(&encoded[1..9], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&encoded[9..29], &[0x11; 20]);
        assert_eq!(encoded[29], 4);
        assert_eq!(&encoded[30..34], b"ping");
        assert_eq!(encoded.len(), 34);
    }

    #[test]
    fn truncated_messages_are_rejected() {
        let encoded = Envelope::request(
            5,
            NodeId::random(),
            Request::FindNode {
                target: NodeId::random(),
            },
        )
        .encode();
        for cut in 0..encoded.len() {
            assert!(
                Envelope::decode(&encoded[..cut]).is_err(),
                "prefix of {cut} bytes decoded"
            );
        }
    }

    #[test]
    fn unknown_method_preserves_the_token_and_direction() {
        let mut buf = BytesMut::new();
        buf.put_u8(MESSAGE_TYPE_REQUEST);
        buf.put_u64(0xDEAD_BEEF);
        buf.put_slice(NodeId::random().as_bytes());
        buf.put_u8(4);
        buf.put_slice(b"drop");
        match Envelope::decode(&buf) {
            Err(WireError::UnknownMethod {
                token,
                method,
                request,
            }) => {
                assert_eq!(token, 0xDEAD_BEEF);
                assert_eq!(method, "drop");
                assert!(request);
            }
            other => panic!("expected UnknownMethod, got {other:?}"),
        }
    }

    #[test]
    fn unknown_method_on_a_response_is_flagged_as_such() {
        let mut buf = BytesMut::new();
        buf.put_u8(MESSAGE_TYPE_RESPONSE);
        buf.put_u64(0xFEED);
        buf.put_slice(NodeId::random().as_bytes());
        buf.put_u8(4);
        buf.put_slice(b"drop");
        match Envelope::decode(&buf) {
            Err(WireError::UnknownMethod {
                token,
                method,
                request,
            }) => {
                assert_eq!(token, 0xFEED);
                assert_eq!(method, "drop");
                assert!(!request);
            }
            other => panic!("expected UnknownMethod, got {other:?}"),
        }
    }

    #[test]
    fn bad_message_type_is_rejected() {
        let mut encoded = Envelope::request(5, NodeId::random(), Request::Ping)
            .encode()
            .to_vec();
        encoded[0] = 0x42;
        assert!(matches!(
            Envelope::decode(&encoded),
            Err(WireError::InvalidMessageType(0x42))
        ));
    }

    #[test]
    fn bad_address_family_is_rejected() {
        let mut encoded = Envelope::response(
            5,
            NodeId::random(),
            Response::Nodes {
                contacts: vec![contact_v4(1)],
            },
        )
        .encode()
        .to_vec();
        // Family byte sits right after the count byte and the contact id.
        let family_at = encoded.len() - 7;
        assert_eq!(encoded[family_at], 4);
        encoded[family_at] = 9;
        assert!(matches!(
            Envelope::decode(&encoded),
            Err(WireError::InvalidFamily(9))
        ));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut encoded = Envelope::request(5, NodeId::random(), Request::Ping)
            .encode()
            .to_vec();
        encoded.push(0);
        assert!(matches!(
            Envelope::decode(&encoded),
            Err(WireError::TrailingBytes)
        ));
    }

    #[test]
    fn non_binary_store_boolean_is_rejected() {
        let mut encoded = Envelope::response(
            5,
            NodeId::random(),
            Response::Stored { accepted: true },
        )
        .encode()
        .to_vec();
        *encoded.last_mut().unwrap() = 2;
        assert!(matches!(
            Envelope::decode(&encoded),
            Err(WireError::InvalidBoolean(2))
        ));
    }

    #[test]
    fn oversized_value_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(MESSAGE_TYPE_RESPONSE);
        buf.put_u64(5);
        buf.put_slice(NodeId::random().as_bytes());
        buf.put_u8(10);
        buf.put_slice(b"find_value");
        buf.put_u8(1);
        buf.put_u16((MAX_VALUE_LEN + 1) as u16);
        buf.put_slice(&vec![0u8; MAX_VALUE_LEN + 1]);
        assert!(matches!(
            Envelope::decode(&buf),
            Err(WireError::FieldTooLong { .. })
        ));
    }
}
