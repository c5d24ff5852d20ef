//! Responder and data log driven by live traffic

mod common;

use common::{open_server, wait_for, WAIT};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use xtools_core::core::logger::{Direction, LogEntry};
use xtools_core::core::responder::{Responder, ResponderItem, ResponseOption};
use xtools_core::core::transport::TcpServerConfig;
use xtools_core::{
    DataLogConfig, DataLogger, FrameParameters, LogFormat, TextFormat, TransportConfig,
    TransportEvent,
};

#[tokio::test]
async fn test_responder_answers_and_traffic_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    let (mut server, addr) =
        open_server(TransportConfig::TcpServer(TcpServerConfig::new("127.0.0.1", 0))).await;
    let cancel = CancellationToken::new();

    let logger = Arc::new(
        DataLogger::open(DataLogConfig {
            enabled: true,
            path: dir.path().join("traffic.jsonl"),
            format: LogFormat::JsonLines,
            ..Default::default()
        })
        .unwrap(),
    );
    let log_task = logger.clone().spawn(server.subscribe(), cancel.clone());

    let responder = Responder::new(vec![ResponderItem::new(
        ResponseOption::InputEqualReference,
        FrameParameters::new("ping", TextFormat::Utf8),
        FrameParameters::new("pong", TextFormat::Utf8),
    )]);
    let responder_task = responder.spawn(
        server.read_router().subscribe("responder"),
        server.handle(),
        cancel.clone(),
    );

    let mut events = server.subscribe();
    let mut client = TcpStream::connect(addr).await.unwrap();
    wait_for(&mut events, |e| matches!(e, TransportEvent::PeerConnected(_))).await;

    client.write_all(b"ping").await.unwrap();
    let mut reply = [0u8; 4];
    tokio::time::timeout(WAIT, client.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&reply, b"pong");
    tokio::time::timeout(WAIT, async {
        while logger.stats().0 < 2 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    cancel.cancel();
    responder_task.await.unwrap();
    log_task.await.unwrap();
    server.close_device().await;

    let content = std::fs::read_to_string(logger.path()).unwrap();
    let entries: Vec<LogEntry> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].direction, Direction::Rx);
    assert_eq!(entries[0].data, b"ping");
    assert_eq!(entries[1].direction, Direction::Tx);
    assert_eq!(entries[1].data, b"pong");
}
