//! Inbound identification and outbound discovery.
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{config, eventually, start, start_node, Note, RawListener, RawPeer};
use netmesh::core::attribute::{decode, PacketObject};
use netmesh::protocol::message::{Ack, Hello};
use netmesh::service::directory::Node;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const WAIT: Duration = Duration::from_secs(3);

// ============================================================================
// Inbound
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identified_peer_is_acknowledged_and_recorded() {
    let (b, b_addr) = start_node(2).await;

    let mut peer = RawPeer::connect(b_addr).await;
    let ack = peer.identify(7, 4242).await;
    assert_eq!(ack.source, 2);
    assert_eq!(ack.destination, 7);

    assert!(eventually(WAIT, || b.connection(7).is_some()).await);
    let node = b.node(7).expect("peer recorded");
    assert_eq!(node.address.port(), 4242);
    assert!(node.address.ip().is_loopback());
    assert_eq!(b.metrics().handshakes_success, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_silent_peer_is_dropped() {
    let (b, b_addr) = start_node(2).await;

    // 5 attempts of 100ms
    let mut peer = RawPeer::connect(b_addr).await;
    assert!(peer.closed_within(WAIT).await);

    assert!(eventually(WAIT, || b.metrics().handshakes_failed == 1).await);
    assert!(b.nodes().is_empty());
    assert!(b.connections().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_garbage_bytes_close_the_socket() {
    let (b, b_addr) = start_node(2).await;

    let mut stream = TcpStream::connect(b_addr).await.unwrap();
    // full chain and a payload length far beyond the size limit
    stream.write_all(&[0xFF; 300]).await.unwrap();
    let mut peer = RawPeer::from_stream(stream);

    assert!(peer.closed_within(WAIT).await);
    assert!(eventually(WAIT, || b.metrics().handshakes_failed == 1).await);
    assert!(b.nodes().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_peer_claiming_local_id_is_rejected() {
    let (b, b_addr) = start_node(2).await;

    let mut peer = RawPeer::connect(b_addr).await;
    peer.send_object(2, 0, 15, &Hello { port: 9 }).await;

    assert!(peer.closed_within(WAIT).await);
    assert!(b.connections().is_empty());
    assert!(b.node(2).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_application_packets_before_hello_are_ignored() {
    let (b, b_addr) = start_node(2).await;
    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = delivered.clone();
    b.register::<Note, _>(move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();

    let mut peer = RawPeer::connect(b_addr).await;
    peer.send_object(1, 2, 15, &Note { text: "early".into() }).await;
    peer.identify(1, 9).await;

    assert!(eventually(WAIT, || b.connection(1).is_some()).await);
    assert_eq!(delivered.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_discover_records_both_sides() {
    let (a, _) = start_node(1).await;
    let (b, b_addr) = start_node(2).await;

    let found = a.discover(vec![b_addr]).await;
    assert_eq!(found, vec![Node::new(2, b_addr)]);
    assert_eq!(a.node(2), Some(Node::new(2, b_addr)));

    // B learned A through the HELO
    assert!(eventually(WAIT, || b.node(1).is_some()).await);
    assert_eq!(a.metrics().handshakes_total, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_discover_sends_hello_to_unknown_destination() {
    let (a, a_addr) = start_node(1).await;
    let listener = RawListener::bind().await;
    let addr = listener.addr;

    let probe = tokio::spawn(async move { a.discover(vec![addr]).await });
    let mut peer = listener.accept(WAIT).await.expect("discovery dial");
    let hello = peer.next(WAIT).await.unwrap();
    assert_eq!(hello.packet_type, Hello::packet_type());
    assert_eq!(hello.source, 1);
    assert_eq!(hello.destination, 0);
    assert_eq!(
        decode::<Hello>(&hello.payload).unwrap().port,
        a_addr.port()
    );

    peer.send_object(5, 1, 15, &Ack {}).await;
    let found = probe.await.unwrap();
    assert_eq!(found, vec![Node::new(5, addr)]);
}

#[tokio::test]
async fn test_discover_closed_port_finds_nothing() {
    let (a, _) = start(config(1)).await;
    let listener = RawListener::bind().await;
    let addr = listener.addr;
    drop(listener);

    assert!(a.discover(vec![addr]).await.is_empty());
    assert!(a.nodes().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_discover_silent_listener_finds_nothing() {
    let (a, _) = start_node(1).await;
    let listener = RawListener::bind().await;
    let addr = listener.addr;

    let held = tokio::spawn(async move {
        let peer = listener.accept(WAIT).await;
        tokio::time::sleep(WAIT).await;
        drop(peer);
    });

    assert!(a.discover(vec![addr]).await.is_empty());
    assert!(a.nodes().is_empty());
    held.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_background_scan_reports_responders() {
    let (a, _) = start_node(1).await;
    let (_b, b_addr) = start_node(2).await;
    let (_c, c_addr) = start_node(3).await;
    let dead = {
        let listener = RawListener::bind().await;
        listener.addr
    };

    let mut found = a.start_scan(vec![b_addr, dead, c_addr]).await.unwrap();
    found.sort_by_key(|node| node.id);
    assert_eq!(found, vec![Node::new(2, b_addr), Node::new(3, c_addr)]);
    assert_eq!(a.nodes().len(), 2);
}
