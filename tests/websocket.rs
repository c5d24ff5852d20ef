//! WebSocket client and server sessions
#![cfg(feature = "websocket")]

mod common;

use bytes::Bytes;
use common::{collect, open_server, registry, wait_for};
use xtools_core::core::transport::{WebSocketClientConfig, WebSocketServerConfig};
use xtools_core::{DeviceSession, TransportConfig, TransportEvent};

#[tokio::test]
async fn test_client_and_server_exchange_binary_frames() {
    let (mut server, addr) = open_server(TransportConfig::WebSocketServer(WebSocketServerConfig {
        bind_host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    }))
    .await;
    let mut server_events = server.subscribe();
    let mut server_rx = server.read_router().subscribe("test");

    let mut client = DeviceSession::new(
        registry(),
        TransportConfig::WebSocketClient(WebSocketClientConfig::new(&format!("ws://{addr}"))),
    );
    let mut client_rx = client.read_router().subscribe("test");
    client.open_device().await.unwrap();
    wait_for(&mut server_events, |e| matches!(e, TransportEvent::PeerConnected(_))).await;

    assert!(client.input_bytes(Bytes::from_static(&[0x01, 0xFF, 0x00])));
    assert_eq!(collect(&mut server_rx, 3).await, [0x01, 0xFF, 0x00]);

    server.write(Bytes::from_static(b"reply")).await.unwrap();
    assert_eq!(collect(&mut client_rx, 5).await, b"reply");

    client.close_device().await;
    wait_for(&mut server_events, |e| matches!(e, TransportEvent::PeerDisconnected(_))).await;
    assert!(server.peers().is_empty());
    server.close_device().await;
}
