//! Fan-out of read bytes and fan-in of concurrent writers

mod common;

use bytes::Bytes;
use common::{collect, open_server, registry, WAIT};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use xtools_core::core::transport::TcpServerConfig;
use xtools_core::{ByteSink, DeviceSession, TcpClientConfig, TransportConfig, TransportEvent};

#[tokio::test]
async fn test_read_bytes_reach_every_consumer_in_order() {
    let (mut server, addr) =
        open_server(TransportConfig::TcpServer(TcpServerConfig::new("127.0.0.1", 0))).await;
    let mut consumers: Vec<_> = (0..3)
        .map(|i| server.read_router().subscribe(&format!("consumer-{i}")))
        .collect();

    let mut client = TcpStream::connect(addr).await.unwrap();
    let expected: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    for chunk in expected.chunks(100) {
        client.write_all(chunk).await.unwrap();
    }

    for consumer in &mut consumers {
        assert_eq!(collect(consumer, expected.len()).await, expected);
    }
    let (rx, _) = server.statistics();
    assert_eq!(rx.bytes, expected.len() as u64);

    server.close_device().await;
}

#[tokio::test]
async fn test_concurrent_writers_keep_frames_whole() {
    let (mut server, addr) =
        open_server(TransportConfig::TcpServer(TcpServerConfig::new("127.0.0.1", 0))).await;
    let mut events = server.subscribe();
    let mut peer = TcpStream::connect(addr).await.unwrap();
    common::wait_for(&mut events, |e| matches!(e, TransportEvent::PeerConnected(_))).await;

    let mut written = server.written_router().subscribe("test");
    let writers: Vec<_> = (0..4u8)
        .map(|w| {
            let handle = server.handle();
            tokio::spawn(async move {
                for i in 0..50u8 {
                    let frame = Bytes::from(vec![w, i, w, i, w, i, w, i]);
                    assert!(handle.input_bytes(frame));
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    let mut frames = Vec::new();
    while frames.len() < 200 {
        let frame = tokio::time::timeout(WAIT, written.recv()).await.unwrap().unwrap();
        frames.push(frame);
    }
    for frame in &frames {
        assert_eq!(frame.len(), 8);
        assert!(frame.chunks(2).all(|pair| pair == &frame[..2]));
    }
    for w in 0..4u8 {
        let order: Vec<u8> = frames.iter().filter(|f| f[0] == w).map(|f| f[1]).collect();
        assert_eq!(order, (0..50).collect::<Vec<u8>>());
    }

    let mut received = vec![0u8; 200 * 8];
    tokio::time::timeout(WAIT, peer.read_exact(&mut received))
        .await
        .unwrap()
        .unwrap();
    assert!(received.chunks(8).all(|f| f.chunks(2).all(|pair| pair == &f[..2])));

    server.close_device().await;
}

#[tokio::test]
async fn test_session_handle_as_sink_bridges_devices() {
    let (mut server, addr) =
        open_server(TransportConfig::TcpServer(TcpServerConfig::new("127.0.0.1", 0))).await;
    let mut source = TcpStream::connect(addr).await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let target = listener.local_addr().unwrap();
    let mut client = DeviceSession::new(
        registry(),
        TransportConfig::TcpClient(TcpClientConfig::new("127.0.0.1", target.port())),
    );
    client.open_device().await.unwrap();
    let (mut destination, _) = listener.accept().await.unwrap();

    // server input flows straight out of the client
    let sink: Arc<dyn ByteSink> = Arc::new(client.handle());
    let id = server.read_router().attach("forward", sink);

    source.write_all(b"forwarded").await.unwrap();
    let mut buf = [0u8; 9];
    tokio::time::timeout(WAIT, destination.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"forwarded");

    assert!(server.read_router().detach(id));
    let mut client_written = client.written_router().subscribe("test");
    source.write_all(b"dropped").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(client_written.try_recv().is_none());

    client.close_device().await;
    server.close_device().await;
}
