//! Device session: one logical byte stream over a swappable transport
//!
//! A session owns at most one transport at a time, gates input and inbound
//! forwarding with an enable flag, and keeps rx/tx statistics. Producers
//! (emitter, responder, repeaters, presets) feed the device through a
//! cloneable [`SessionHandle`].

use super::protocol::FrameParameters;
use super::router::{ByteSink, Router};
use super::statistics::{Statistician, StatisticsSnapshot};
use super::transport::{
    CommandPort, PeerId, PeerInfo, Target, Taps, Transport, TransportConfig, TransportError,
    TransportEvent, TransportKind, TransportRegistry, TransportState,
};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cloneable input side of a session
#[derive(Clone, Debug)]
pub struct SessionHandle {
    port: Arc<RwLock<Option<CommandPort>>>,
    enabled: Arc<AtomicBool>,
    events: broadcast::Sender<TransportEvent>,
    dropped: Arc<AtomicU64>,
}

impl SessionHandle {
    /// True while the device's transport task is running
    pub fn is_working(&self) -> bool {
        self.port.read().as_ref().is_some_and(|p| !p.is_closed())
    }

    /// Chunks lost to a full or closed command queue
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue bytes for the device without waiting.
    ///
    /// Returns false when the bytes were ignored: empty input, a disabled
    /// session, a device that is not working, or a full queue. Queue
    /// failures are counted in [`dropped`](Self::dropped) and published
    /// as a [`TransportEvent::Warning`].
    pub fn input_bytes(&self, bytes: Bytes) -> bool {
        self.input_bytes_to(Target::Broadcast, bytes)
    }

    /// Queue bytes for one peer of a server transport
    pub fn input_bytes_to(&self, target: Target, bytes: Bytes) -> bool {
        if bytes.is_empty() {
            debug!("ignoring empty input");
            return false;
        }
        if !self.enabled.load(Ordering::Acquire) {
            debug!(len = bytes.len(), "session disabled, input ignored");
            return false;
        }

        let port = self.port.read();
        let Some(port) = port.as_ref().filter(|p| !p.is_closed()) else {
            debug!(len = bytes.len(), "device is not working, input ignored");
            return false;
        };
        match port.try_write(target, bytes) {
            Ok(()) => true,
            Err(e) => {
                let count = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped = count, "input dropped: {}", e);
                let _ = self
                    .events
                    .send(TransportEvent::Warning(format!("input dropped: {e}")));
                false
            }
        }
    }

    /// Build a frame from `params` and queue it
    pub fn send_frame(&self, params: &FrameParameters) -> bool {
        self.input_bytes(params.to_bytes())
    }

    /// Resend a frame every `interval` until the token is cancelled
    pub fn spawn_cycle(
        &self,
        params: FrameParameters,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        handle.send_frame(&params);
                    }
                }
            }
        })
    }
}

impl ByteSink for SessionHandle {
    fn input_bytes(&self, bytes: &Bytes) {
        SessionHandle::input_bytes(self, bytes.clone());
    }
}

/// Device session
pub struct DeviceSession {
    id: Uuid,
    registry: Arc<TransportRegistry>,
    config: TransportConfig,
    transport: Option<Transport>,
    taps: Taps,
    handle: SessionHandle,
    rx_stats: Arc<Statistician>,
    tx_stats: Arc<Statistician>,
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("kind", &self.config.kind())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    /// Create a closed session for `config`
    pub fn new(registry: Arc<TransportRegistry>, config: TransportConfig) -> Self {
        let taps = Taps::new();
        let rx_stats = Arc::new(Statistician::new());
        let tx_stats = Arc::new(Statistician::new());
        taps.read.attach("rx-statistics", rx_stats.clone());
        taps.written.attach("tx-statistics", tx_stats.clone());

        let handle = SessionHandle {
            port: Arc::new(RwLock::new(None)),
            enabled: taps.enabled.clone(),
            events: taps.events.clone(),
            dropped: Arc::new(AtomicU64::new(0)),
        };

        Self {
            id: Uuid::new_v4(),
            registry,
            config,
            transport: None,
            taps,
            handle,
            rx_stats,
            tx_stats,
        }
    }

    /// Session id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Kind of the configured transport
    pub fn kind(&self) -> TransportKind {
        self.config.kind()
    }

    /// Transport state, `Closed` when no transport exists
    pub fn state(&self) -> TransportState {
        self.transport
            .as_ref()
            .map_or(TransportState::Closed, Transport::state)
    }

    /// True while the transport is open
    pub fn is_working(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Open the configured transport, closing a running one first
    pub async fn open_device(&mut self) -> Result<(), TransportError> {
        if self.transport.is_some() {
            self.close_device().await;
        }

        let kind = self.config.kind();
        let mut transport = self
            .registry
            .create_with(self.config.clone(), self.taps.clone())
            .ok_or(TransportError::UnsupportedType(kind))?;

        info!(session = %self.id, kind = %kind, endpoint = %self.config.endpoint(), "opening device");
        transport.open().await?;
        *self.handle.port.write() = transport.port();
        self.transport = Some(transport);
        Ok(())
    }

    /// Close the transport. Idempotent; bounded by
    /// [`CLOSE_TIMEOUT`](super::transport::CLOSE_TIMEOUT).
    pub async fn close_device(&mut self) {
        *self.handle.port.write() = None;
        if let Some(mut transport) = self.transport.take() {
            info!(session = %self.id, kind = %transport.kind(), "closing device");
            transport.close().await;
        }
    }

    /// Queue bytes without waiting; see [`SessionHandle::input_bytes`]
    pub fn input_bytes(&self, bytes: Bytes) -> bool {
        self.handle.input_bytes(bytes)
    }

    /// Queue bytes, waiting for queue capacity
    pub async fn write(&self, bytes: Bytes) -> Result<(), TransportError> {
        self.send_to(None, bytes).await
    }

    /// Queue bytes for one peer, or all peers when `peer` is `None`
    pub async fn send_to(&self, peer: Option<PeerId>, bytes: Bytes) -> Result<(), TransportError> {
        if bytes.is_empty() {
            return Ok(());
        }
        match &self.transport {
            Some(transport) => transport.send_to(peer, bytes).await,
            None => Err(TransportError::NotConnected),
        }
    }

    /// Replace the transport configuration; rejected while open
    pub fn load(&mut self, config: TransportConfig) -> Result<(), TransportError> {
        if self.is_working() {
            return Err(TransportError::Busy);
        }
        self.config = config;
        Ok(())
    }

    /// Current transport configuration
    pub fn save(&self) -> TransportConfig {
        self.config.clone()
    }

    /// Gate input and inbound forwarding
    pub fn set_enabled(&self, enabled: bool) {
        self.taps.enabled.store(enabled, Ordering::Release);
    }

    /// Whether input and inbound forwarding are enabled
    pub fn is_enabled(&self) -> bool {
        self.taps.enabled.load(Ordering::Acquire)
    }

    /// Input side for producers
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Subscribe to transport events
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.taps.events.subscribe()
    }

    /// Inbound byte stream
    pub fn read_router(&self) -> &Router {
        &self.taps.read
    }

    /// Outbound byte stream
    pub fn written_router(&self) -> &Router {
        &self.taps.written
    }

    /// Rx and tx counters
    pub fn statistics(&self) -> (StatisticsSnapshot, StatisticsSnapshot) {
        (self.rx_stats.snapshot(), self.tx_stats.snapshot())
    }

    /// Input chunks dropped because the command queue was full
    pub fn dropped_input(&self) -> u64 {
        self.handle.dropped()
    }

    /// Clear rx and tx counters and the dropped input count
    pub fn reset_statistics(&self) {
        self.rx_stats.reset();
        self.tx_stats.reset();
        self.handle.dropped.store(0, Ordering::Relaxed);
    }

    /// Peers of a server transport
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.transport
            .as_ref()
            .map(Transport::peers)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::testing::loopback_registry;
    use crate::core::transport::TcpClientConfig;

    #[tokio::test]
    async fn test_input_round_trip_and_statistics() {
        let mut session = DeviceSession::new(loopback_registry(), TransportConfig::default());
        let mut inbound = session.read_router().subscribe("test");

        assert!(!session.input_bytes(Bytes::from_static(b"early")));
        session.open_device().await.unwrap();
        assert!(session.is_working());

        assert!(!session.input_bytes(Bytes::new()));
        assert!(session.input_bytes(Bytes::from_static(b"hello")));
        assert_eq!(inbound.recv().await.unwrap(), "hello");

        let (rx, tx) = session.statistics();
        assert_eq!(rx.bytes, 5);
        assert_eq!(tx.bytes, 5);

        session.close_device().await;
        assert!(!session.is_working());
        assert!(!session.input_bytes(Bytes::from_static(b"late")));
        session.close_device().await;
    }

    #[tokio::test]
    async fn test_disabled_session_ignores_input() {
        let mut session = DeviceSession::new(loopback_registry(), TransportConfig::default());
        session.open_device().await.unwrap();
        session.set_enabled(false);
        assert!(!session.handle().input_bytes(Bytes::from_static(b"x")));
        session.set_enabled(true);
        assert!(session.handle().input_bytes(Bytes::from_static(b"x")));
        session.close_device().await;
    }

    #[tokio::test]
    async fn test_full_queue_counts_dropped_input() {
        let mut session = DeviceSession::new(loopback_registry(), TransportConfig::default());
        let mut events = session.subscribe();
        session.open_device().await.unwrap();

        // the driver cannot run before this loop yields
        let accepted = (0..300)
            .filter(|_| session.input_bytes(Bytes::from_static(b"x")))
            .count();
        assert_eq!(accepted, 256);
        assert_eq!(session.dropped_input(), 44);

        loop {
            match events.recv().await.unwrap() {
                TransportEvent::Warning(msg) => {
                    assert!(msg.contains("input dropped"));
                    break;
                }
                _ => continue,
            }
        }

        session.reset_statistics();
        assert_eq!(session.dropped_input(), 0);
        session.close_device().await;
    }

    #[tokio::test]
    async fn test_load_rejected_while_open() {
        let mut session = DeviceSession::new(loopback_registry(), TransportConfig::default());
        session.open_device().await.unwrap();
        let other = TransportConfig::TcpClient(TcpClientConfig::new("10.0.0.1", 1));
        assert!(matches!(session.load(other.clone()), Err(TransportError::Busy)));
        session.close_device().await;
        session.load(other.clone()).unwrap();
        assert_eq!(session.save(), other);
    }

    #[tokio::test]
    async fn test_unsupported_kind() {
        let config = TransportConfig::default_for(TransportKind::Hid);
        let mut session = DeviceSession::new(loopback_registry(), config);
        let err = session.open_device().await.unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedType(TransportKind::Hid)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cyclic_send() {
        let mut session = DeviceSession::new(loopback_registry(), TransportConfig::default());
        let mut written = session.written_router().subscribe("test");
        session.open_device().await.unwrap();

        let cancel = CancellationToken::new();
        let params = FrameParameters::new("ping", crate::core::codec::TextFormat::Utf8);
        let task = session
            .handle()
            .spawn_cycle(params, Duration::from_millis(100), cancel.clone());

        for _ in 0..3 {
            assert_eq!(written.recv().await.unwrap(), "ping");
        }
        cancel.cancel();
        task.await.unwrap();
        session.close_device().await;
    }
}
