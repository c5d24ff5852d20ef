//! UDP transports over loopback sockets

mod common;

use bytes::Bytes;
use common::{collect, open_server, registry, wait_for};
use tokio_test::assert_err;
use xtools_core::core::transport::{UdpClientConfig, UdpServerConfig};
use xtools_core::{DeviceSession, TransportConfig, TransportEvent};

#[tokio::test]
async fn test_server_learns_peers_from_datagrams() {
    let (mut server, addr) =
        open_server(TransportConfig::UdpServer(UdpServerConfig::new("127.0.0.1", 0))).await;
    let mut events = server.subscribe();
    assert!(server.peers().is_empty());

    let mut client = DeviceSession::new(
        registry(),
        TransportConfig::UdpClient(UdpClientConfig::new("127.0.0.1", addr.port())),
    );
    let mut client_rx = client.read_router().subscribe("test");
    client.open_device().await.unwrap();

    assert!(client.input_bytes(Bytes::from_static(b"ping")));

    let peer = match wait_for(&mut events, |e| matches!(e, TransportEvent::PeerConnected(_))).await {
        TransportEvent::PeerConnected(info) => info.id,
        _ => unreachable!(),
    };
    match wait_for(&mut events, |e| matches!(e, TransportEvent::BytesRead { .. })).await {
        TransportEvent::BytesRead { bytes, peer: from, .. } => {
            assert_eq!(&bytes[..], b"ping");
            assert_eq!(from, Some(peer));
        }
        _ => unreachable!(),
    }
    assert_eq!(server.peers().len(), 1);

    server.send_to(Some(peer), Bytes::from_static(b"pong")).await.unwrap();
    assert_eq!(collect(&mut client_rx, 4).await, b"pong");

    // a second datagram from the same address reuses the peer
    assert!(client.input_bytes(Bytes::from_static(b"again")));
    match wait_for(&mut events, |e| matches!(e, TransportEvent::BytesRead { .. })).await {
        TransportEvent::BytesRead { peer: from, .. } => assert_eq!(from, Some(peer)),
        _ => unreachable!(),
    }
    assert_eq!(server.peers().len(), 1);

    client.close_device().await;
    server.close_device().await;
    assert!(server.peers().is_empty());
}

#[tokio::test]
async fn test_client_requires_port() {
    let mut client = DeviceSession::new(
        registry(),
        TransportConfig::UdpClient(UdpClientConfig::new("127.0.0.1", 0)),
    );
    assert_err!(client.open_device().await);
    assert!(!client.is_working());
}

#[tokio::test]
async fn test_server_peer_cap_forgets_oldest() {
    let config = UdpServerConfig::new("127.0.0.1", 0).peer_limits(1, 600);
    let (mut server, addr) = open_server(TransportConfig::UdpServer(config)).await;
    let mut events = server.subscribe();

    let first = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    first.send_to(b"one", addr).await.unwrap();
    let first_id = match wait_for(&mut events, |e| matches!(e, TransportEvent::PeerConnected(_))).await {
        TransportEvent::PeerConnected(info) => info.id,
        _ => unreachable!(),
    };

    let second = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    second.send_to(b"two", addr).await.unwrap();
    let gone = wait_for(&mut events, |e| matches!(e, TransportEvent::PeerDisconnected(_))).await;
    assert_eq!(gone, TransportEvent::PeerDisconnected(first_id));
    let second_id = match wait_for(&mut events, |e| matches!(e, TransportEvent::PeerConnected(_))).await {
        TransportEvent::PeerConnected(info) => info.id,
        _ => unreachable!(),
    };

    assert_ne!(first_id, second_id);
    let peers = server.peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].id, second_id);

    server.close_device().await;
}
