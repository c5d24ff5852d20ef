//! Composed frames on the wire

mod common;

use common::{registry, WAIT};
use tokio::io::AsyncReadExt;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use xtools_core::{
    ChecksumAlgorithm, DeviceSession, FrameParameters, TcpClientConfig, TextFormat, TransportConfig,
};

fn scenario() -> FrameParameters {
    FrameParameters::new("01 02 03", TextFormat::Hex)
        .prefix(r"\xAA")
        .suffix(r"\xBB")
        .crc(ChecksumAlgorithm::Crc16Ccitt, true)
}

#[tokio::test]
async fn test_frame_sent_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut session = DeviceSession::new(
        registry(),
        TransportConfig::TcpClient(TcpClientConfig::new("127.0.0.1", port)),
    );
    session.open_device().await.unwrap();
    let (mut remote, _) = listener.accept().await.unwrap();

    assert!(session.handle().send_frame(&scenario()));

    let mut wire = [0u8; 7];
    tokio::time::timeout(WAIT, remote.read_exact(&mut wire))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wire, [0xAA, 0x01, 0x02, 0x03, 0x5B, 0xF7, 0xBB]);

    session.close_device().await;
}

#[tokio::test]
async fn test_cyclic_frames_until_cancelled() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut session = DeviceSession::new(
        registry(),
        TransportConfig::TcpClient(TcpClientConfig::new("127.0.0.1", port)),
    );
    session.open_device().await.unwrap();
    let (mut remote, _) = listener.accept().await.unwrap();

    let cancel = CancellationToken::new();
    let cycle = session
        .handle()
        .spawn_cycle(scenario(), Duration::from_millis(20), cancel.clone());

    let mut wire = [0u8; 21];
    tokio::time::timeout(WAIT, remote.read_exact(&mut wire))
        .await
        .unwrap()
        .unwrap();
    for frame in wire.chunks(7) {
        assert_eq!(frame, [0xAA, 0x01, 0x02, 0x03, 0x5B, 0xF7, 0xBB]);
    }

    cancel.cancel();
    cycle.await.unwrap();
    session.close_device().await;
}
