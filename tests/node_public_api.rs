//! Integration tests for the Node public API.
//!
//! These tests run real nodes over UDP loopback sockets and exercise only
//! the public interface: bind, ping, bootstrap, put, get, close.

use std::net::SocketAddr;

use tokio::time::Duration;

use kadmium::{Node, NodeConfig, RpcError, UdpEndpoint};

fn loopback() -> SocketAddr {
    // Port 0: the OS hands every node its own fresh port.
    "127.0.0.1:0".parse().unwrap()
}

async fn bind_node() -> Node<UdpEndpoint> {
    Node::bind(loopback()).await.expect("bind failed")
}

/// A config with a deadline short enough for timeout tests to run quickly.
fn impatient() -> NodeConfig {
    NodeConfig {
        call_timeout: Duration::from_millis(300),
        ..NodeConfig::default()
    }
}

#[tokio::test]
async fn bind_reports_identity_and_address() {
    let node = bind_node().await;
    assert!(node.local_addr().port() > 0);
    assert_eq!(node.local_id().to_hex().len(), 40);
    node.close().await;
}

#[tokio::test]
async fn single_node_put_get_round_trip() {
    let node = bind_node().await;

    // With an empty routing table the value lands in the local store.
    let stored = node.put(b"hello", b"world".to_vec()).await.unwrap();
    assert_eq!(stored, 1);

    let value = node.get(b"hello").await.unwrap();
    assert_eq!(value, Some(b"world".to_vec()));
    node.close().await;
}

#[tokio::test]
async fn ping_returns_the_peer_identifier_and_updates_the_table() {
    let a = bind_node().await;
    let b = bind_node().await;

    let answered = a.ping(b.local_addr(), Some(b.local_id())).await.unwrap();
    assert_eq!(answered, b.local_id());

    let known = a.closest_contacts(b.local_id(), 1).await;
    assert_eq!(known.first().map(|c| c.id), Some(b.local_id()));

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn ping_to_an_unresponsive_address_times_out() {
    let node = Node::bind_with_config(loopback(), impatient())
        .await
        .expect("bind failed");

    // Bind-and-hold a socket that never answers.
    let silent = tokio::net::UdpSocket::bind(loopback()).await.unwrap();

    let err = node
        .ping(silent.local_addr().unwrap(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Timeout));
    assert_eq!(node.contact_count().await, 0);
    node.close().await;
}

#[tokio::test]
async fn bootstrap_and_get_a_value_held_by_the_seed() {
    let seed = bind_node().await;
    // Stored before anyone is connected: the seed keeps it locally.
    let stored = seed.put(b"origin", b"story".to_vec()).await.unwrap();
    assert_eq!(stored, 1);

    let joiner = bind_node().await;
    joiner
        .bootstrap(&[seed.local_addr()])
        .await
        .expect("bootstrap failed");

    // The joiner fetches the value over the network.
    let value = joiner.get(b"origin").await.unwrap();
    assert_eq!(value, Some(b"story".to_vec()));

    // Bootstrapping is mutual: the seed learned the joiner.
    let seen = seed.closest_contacts(joiner.local_id(), 1).await;
    assert_eq!(seen.first().map(|c| c.id), Some(joiner.local_id()));

    seed.close().await;
    joiner.close().await;
}

#[tokio::test]
async fn put_replicates_to_every_close_peer() {
    let a = bind_node().await;
    let b = bind_node().await;
    let c = bind_node().await;

    a.ping(b.local_addr(), None).await.unwrap();
    a.ping(c.local_addr(), None).await.unwrap();
    b.ping(c.local_addr(), None).await.unwrap();

    let stored = a.put(b"replica", b"copies".to_vec()).await.unwrap();
    assert_eq!(stored, 2);

    // Each peer answers from its own store.
    assert_eq!(b.get(b"replica").await.unwrap(), Some(b"copies".to_vec()));
    assert_eq!(c.get(b"replica").await.unwrap(), Some(b"copies".to_vec()));

    a.close().await;
    b.close().await;
    c.close().await;
}

#[tokio::test]
async fn get_travels_across_a_small_network() {
    let seed = bind_node().await;
    let holder = bind_node().await;
    let asker = bind_node().await;

    holder.bootstrap(&[seed.local_addr()]).await.unwrap();
    asker.bootstrap(&[seed.local_addr()]).await.unwrap();

    holder.put(b"wandering", b"value".to_vec()).await.unwrap();

    let value = asker.get(b"wandering").await.unwrap();
    assert_eq!(value, Some(b"value".to_vec()));

    seed.close().await;
    holder.close().await;
    asker.close().await;
}

#[tokio::test]
async fn get_of_an_unknown_key_reports_not_found() {
    let a = bind_node().await;
    let b = bind_node().await;
    a.ping(b.local_addr(), None).await.unwrap();

    assert_eq!(a.get(b"never-stored").await.unwrap(), None);

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn closed_node_fails_calls_with_transport_closed() {
    let a = Node::bind_with_config(loopback(), impatient())
        .await
        .expect("bind failed");
    let b = bind_node().await;

    a.close().await;
    let err = a.ping(b.local_addr(), None).await.unwrap_err();
    assert!(matches!(err, RpcError::TransportClosed));

    b.close().await;
}
