//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use xtools_core::core::router::Subscription;
use xtools_core::{DeviceSession, TransportConfig, TransportEvent, TransportRegistry};

/// Upper bound for any single wait in these tests
pub const WAIT: Duration = Duration::from_secs(5);

/// Registry with every built-in kind
pub fn registry() -> Arc<TransportRegistry> {
    Arc::new(TransportRegistry::with_builtin())
}

/// Next event, failing the test after [`WAIT`]
pub async fn next_event(events: &mut broadcast::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skip events until one matches
pub async fn wait_for<F>(events: &mut broadcast::Receiver<TransportEvent>, mut pred: F) -> TransportEvent
where
    F: FnMut(&TransportEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

/// Address out of a `listening on HOST:PORT[, ...]` description
pub fn listening_addr(description: &str) -> SocketAddr {
    description
        .strip_prefix("listening on ")
        .and_then(|rest| rest.split(',').next())
        .map(|addr| addr.trim_start_matches("ws://"))
        .and_then(|addr| addr.parse().ok())
        .unwrap_or_else(|| panic!("no address in {description:?}"))
}

/// Open a server session and return it with its bound address
pub async fn open_server(config: TransportConfig) -> (DeviceSession, SocketAddr) {
    let mut session = DeviceSession::new(registry(), config);
    let mut events = session.subscribe();
    session.open_device().await.expect("server should open");
    match wait_for(&mut events, |e| matches!(e, TransportEvent::Opened { .. })).await {
        TransportEvent::Opened { description } => (session, listening_addr(&description)),
        _ => unreachable!(),
    }
}

/// Collect at least `len` bytes from a router subscription
pub async fn collect(sub: &mut Subscription, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while out.len() < len {
        let chunk = tokio::time::timeout(WAIT, sub.recv())
            .await
            .expect("timed out waiting for bytes")
            .expect("router closed");
        out.extend_from_slice(&chunk);
    }
    out
}

