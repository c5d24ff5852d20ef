//! Generic transport driver
//!
//! Runs one [`Link`] on a dedicated task. Commands come in over a bounded
//! channel, inbound data leaves through the read [`Router`] and lifecycle
//! changes are published on a broadcast channel.

use super::{
    Delivered, Link, LinkEvent, Opener, PeerId, PeerInfo, Target, TransportConfig, TransportError,
    TransportEvent, TransportKind, TransportState,
};
use crate::core::router::Router;
use bytes::Bytes;
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound for joining the transport task on close
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);
/// Budget for finishing an in-flight write once close is requested.
/// Together with [`SHUTDOWN_TIMEOUT`] it stays below [`CLOSE_TIMEOUT`].
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const COMMAND_QUEUE: usize = 256;
const EVENT_CAPACITY: usize = 1024;

/// Outputs shared between a transport and its owner
#[derive(Clone, Debug)]
pub struct Taps {
    /// Inbound bytes
    pub read: Router,
    /// Bytes actually written
    pub written: Router,
    /// Lifecycle and traffic events
    pub events: broadcast::Sender<TransportEvent>,
    /// Inbound forwarding gate
    pub enabled: Arc<AtomicBool>,
}

impl Default for Taps {
    fn default() -> Self {
        Self::new()
    }
}

impl Taps {
    /// Fresh routers and event channel, forwarding enabled
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            read: Router::new(),
            written: Router::new(),
            events,
            enabled: Arc::new(AtomicBool::new(true)),
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

enum Command {
    Write { target: Target, bytes: Bytes },
}

/// Sending half of a running transport's command queue
#[derive(Clone, Debug)]
pub struct CommandPort {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Write { target, bytes } => write!(f, "Write({target:?}, {} bytes)", bytes.len()),
        }
    }
}

impl CommandPort {
    /// Queue a write without waiting
    pub fn try_write(&self, target: Target, bytes: Bytes) -> Result<(), TransportError> {
        self.tx
            .try_send(Command::Write { target, bytes })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    TransportError::SendError("command queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => TransportError::NotConnected,
            })
    }

    /// Queue a write, waiting for queue capacity
    pub async fn write(&self, target: Target, bytes: Bytes) -> Result<(), TransportError> {
        self.tx
            .send(Command::Write { target, bytes })
            .await
            .map_err(|_| TransportError::NotConnected)
    }

    /// True once the transport task has exited
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Default)]
struct Shared {
    state: RwLock<TransportState>,
    peers: Mutex<HashMap<PeerId, PeerInfo>>,
}

struct Worker {
    port: CommandPort,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Handle to one transport endpoint
pub struct Transport {
    config: TransportConfig,
    opener: Opener,
    taps: Taps,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Create a closed transport
    pub fn new(config: TransportConfig, opener: Opener, taps: Taps) -> Self {
        Self {
            config,
            opener,
            taps,
            shared: Arc::new(Shared::default()),
            worker: None,
        }
    }

    /// Transport kind
    pub fn kind(&self) -> TransportKind {
        self.config.kind()
    }

    /// Current configuration
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Replace the configuration; rejected while running
    pub fn set_config(&mut self, config: TransportConfig) -> Result<(), TransportError> {
        if self.worker.is_some() {
            return Err(TransportError::Busy);
        }
        if config.kind() != self.kind() {
            return Err(TransportError::InvalidConfiguration(format!(
                "expected {} configuration, got {}",
                self.kind(),
                config.kind()
            )));
        }
        self.config = config;
        Ok(())
    }

    /// Lifecycle state
    pub fn state(&self) -> TransportState {
        *self.shared.state.read()
    }

    /// True while the endpoint is open
    pub fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Connected peers, ordered by id
    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers: Vec<_> = self.shared.peers.lock().values().cloned().collect();
        peers.sort_by_key(|p| p.id);
        peers
    }

    /// Routers and event channel of this transport
    pub fn taps(&self) -> &Taps {
        &self.taps
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.taps.events.subscribe()
    }

    /// Command queue of the running task
    pub fn port(&self) -> Option<CommandPort> {
        self.worker.as_ref().map(|w| w.port.clone())
    }

    /// Open the endpoint and start its task.
    ///
    /// A running transport is closed first.
    pub async fn open(&mut self) -> Result<(), TransportError> {
        if self.worker.is_some() {
            self.close().await;
        }
        self.config.validate()?;

        let cancel = CancellationToken::new();
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = Task {
            kind: self.kind(),
            taps: self.taps.clone(),
            shared: self.shared.clone(),
            cmd_rx,
            cancel: cancel.clone(),
        };
        let opening = (self.opener)(self.config.clone());
        let handle = tokio::spawn(task.run(opening, ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => {
                self.worker = Some(Worker {
                    port: CommandPort { tx: cmd_tx },
                    cancel,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.await;
                Err(e)
            }
            Err(_) => {
                let _ = handle.await;
                Err(TransportError::ConnectionFailed(
                    "transport task ended before opening".to_string(),
                ))
            }
        }
    }

    /// Stop the task. Idempotent.
    ///
    /// The task is joined for at most [`CLOSE_TIMEOUT`] and aborted after.
    pub async fn close(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        worker.cancel.cancel();
        let mut handle = worker.handle;
        if tokio::time::timeout(CLOSE_TIMEOUT, &mut handle).await.is_err() {
            warn!(kind = %self.kind(), "transport task did not stop in time, aborting");
            handle.abort();
            let _ = handle.await;
            self.shared.peers.lock().clear();
            *self.shared.state.write() = TransportState::Closed;
            self.taps.emit(TransportEvent::Closed);
        }
    }

    /// Queue bytes for every peer
    pub async fn send(&self, bytes: Bytes) -> Result<(), TransportError> {
        self.send_to(None, bytes).await
    }

    /// Queue bytes for one peer, or every peer when `peer` is `None`
    pub async fn send_to(&self, peer: Option<PeerId>, bytes: Bytes) -> Result<(), TransportError> {
        let port = self.open_port()?;
        let target = peer.map_or(Target::Broadcast, Target::Peer);
        port.write(target, bytes).await
    }

    /// Queue bytes without waiting for queue capacity
    pub fn try_send(&self, bytes: Bytes) -> Result<(), TransportError> {
        self.open_port()?.try_write(Target::Broadcast, bytes)
    }

    fn open_port(&self) -> Result<&CommandPort, TransportError> {
        match &self.worker {
            Some(worker) if self.is_open() => Ok(&worker.port),
            _ => Err(TransportError::NotConnected),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.cancel.cancel();
        }
    }
}

struct Task {
    kind: TransportKind,
    taps: Taps,
    shared: Arc<Shared>,
    cmd_rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
}

impl Task {
    fn set_state(&self, state: TransportState) {
        *self.shared.state.write() = state;
    }

    async fn run(
        mut self,
        opening: super::OpenFuture,
        ready: oneshot::Sender<Result<(), TransportError>>,
    ) {
        self.set_state(TransportState::Opening);

        let opened = tokio::select! {
            result = opening => result,
            () = self.cancel.cancelled() => Err(TransportError::Disconnected),
        };

        let mut link = match opened {
            Ok(link) => link,
            Err(e) => {
                error!(kind = %self.kind, "failed to open transport: {}", e);
                self.set_state(TransportState::Error);
                self.taps.emit(TransportEvent::Error(e.to_string()));
                self.set_state(TransportState::Closed);
                self.taps.emit(TransportEvent::Closed);
                let _ = ready.send(Err(e));
                return;
            }
        };

        let description = link.describe();
        info!(kind = %self.kind, "transport opened: {}", description);
        self.set_state(TransportState::Open);
        self.taps.emit(TransportEvent::Opened { description });
        let _ = ready.send(Ok(()));

        self.pump(link.as_mut()).await;

        self.set_state(TransportState::Closing);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, link.shutdown()).await.is_err() {
            warn!(kind = %self.kind, "link shutdown timed out");
        }
        drop(link);

        self.shared.peers.lock().clear();
        self.set_state(TransportState::Closed);
        info!(kind = %self.kind, "transport closed");
        self.taps.emit(TransportEvent::Closed);
    }

    async fn pump(&mut self, link: &mut dyn Link) {
        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                cmd = self.cmd_rx.recv() => {
                    let Some(Command::Write { target, bytes }) = cmd else {
                        break;
                    };
                    if !self.write_one(link, target, &bytes).await {
                        break;
                    }
                }

                event = link.recv() => match event {
                    Ok(event) => self.on_link_event(event),
                    Err(e) => {
                        self.fail(&e);
                        break;
                    }
                },
            }
        }
    }

    /// Drive one write. A close arriving mid-write lets it finish within
    /// [`DRAIN_TIMEOUT`]. Returns false once the pump has to stop.
    async fn write_one(&mut self, link: &mut dyn Link, target: Target, bytes: &Bytes) -> bool {
        let mut write = link.write(target, bytes);
        let (result, closing) = tokio::select! {
            result = &mut write => (result, false),
            () = self.cancel.cancelled() => match tokio::time::timeout(DRAIN_TIMEOUT, &mut write).await {
                Ok(result) => (result, true),
                Err(_) => {
                    self.on_link_event(LinkEvent::Warning(format!(
                        "close abandoned a {} byte write after {:?}",
                        bytes.len(),
                        DRAIN_TIMEOUT
                    )));
                    return false;
                }
            },
        };

        match result {
            Ok(delivered) => {
                self.on_written(bytes, delivered);
                !closing
            }
            Err(e) => {
                self.fail(&e);
                false
            }
        }
    }

    fn fail(&self, err: &TransportError) {
        error!(kind = %self.kind, "transport error: {}", err);
        self.set_state(TransportState::Error);
        self.taps.emit(TransportEvent::Error(err.to_string()));
    }

    fn on_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Data { from, peer, bytes } => {
                if bytes.is_empty() {
                    return;
                }
                if !self.taps.enabled.load(Ordering::Acquire) {
                    debug!(kind = %self.kind, len = bytes.len(), "transport disabled, dropping inbound bytes");
                    return;
                }
                if let Some(id) = peer {
                    if let Some(info) = self.shared.peers.lock().get_mut(&id) {
                        info.rx_bytes += bytes.len() as u64;
                    }
                }
                debug!(kind = %self.kind, from = %from, len = bytes.len(), "bytes read");
                self.taps.read.dispatch(&bytes);
                self.taps.emit(TransportEvent::BytesRead { bytes, from, peer });
            }
            LinkEvent::PeerConnected { id, address } => {
                let info = PeerInfo {
                    id,
                    address,
                    connected_at: Local::now(),
                    rx_bytes: 0,
                    tx_bytes: 0,
                };
                info!(kind = %self.kind, peer = %id, "peer connected: {}", info.address);
                self.shared.peers.lock().insert(id, info.clone());
                self.taps.emit(TransportEvent::PeerConnected(info));
            }
            LinkEvent::PeerDisconnected(id) => {
                if self.shared.peers.lock().remove(&id).is_some() {
                    info!(kind = %self.kind, peer = %id, "peer disconnected");
                    self.taps.emit(TransportEvent::PeerDisconnected(id));
                }
            }
            LinkEvent::Warning(msg) => {
                warn!(kind = %self.kind, "{}", msg);
                self.taps.emit(TransportEvent::Warning(msg));
            }
        }
    }

    fn on_written(&self, bytes: &Bytes, delivered: Vec<Delivered>) {
        if delivered.is_empty() {
            debug!(kind = %self.kind, len = bytes.len(), "write reached no peer");
            return;
        }
        for Delivered { peer, to } in delivered {
            if let Some(id) = peer {
                if let Some(info) = self.shared.peers.lock().get_mut(&id) {
                    info.tx_bytes += bytes.len() as u64;
                }
            }
            debug!(kind = %self.kind, to = %to, len = bytes.len(), "bytes written");
            self.taps.written.dispatch(bytes);
            self.taps.emit(TransportEvent::BytesWritten {
                bytes: bytes.clone(),
                to,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::testing::loopback_opener;
    use crate::core::transport::{OpenFuture, TcpClientConfig};

    fn failing_opener() -> Opener {
        Arc::new(|_config| -> OpenFuture {
            Box::pin(async { Err(TransportError::ConnectionFailed("refused".to_string())) })
        })
    }

    fn config() -> TransportConfig {
        TransportConfig::TcpClient(TcpClientConfig::default())
    }

    #[tokio::test]
    async fn test_open_write_read_close() {
        let mut transport = Transport::new(config(), loopback_opener(), Taps::new());
        let mut sub = transport.taps().read.subscribe("test");
        let mut written = transport.taps().written.subscribe("test");
        let mut events = transport.subscribe();

        assert!(matches!(transport.send(Bytes::from_static(b"x")).await, Err(TransportError::NotConnected)));

        transport.open().await.unwrap();
        assert_eq!(transport.state(), TransportState::Open);
        assert!(matches!(events.recv().await.unwrap(), TransportEvent::Opened { .. }));

        transport.send(Bytes::from_static(b"ping")).await.unwrap();
        assert_eq!(sub.recv().await.unwrap(), "ping");
        assert_eq!(written.recv().await.unwrap(), "ping");

        transport.close().await;
        assert_eq!(transport.state(), TransportState::Closed);
        transport.close().await;
    }

    #[tokio::test]
    async fn test_open_failure_returns_to_closed() {
        let mut transport = Transport::new(config(), failing_opener(), Taps::new());
        let mut events = transport.subscribe();

        let err = transport.open().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionFailed(_)));
        assert_eq!(transport.state(), TransportState::Closed);
        assert!(matches!(events.recv().await.unwrap(), TransportEvent::Error(_)));
        assert!(matches!(events.recv().await.unwrap(), TransportEvent::Closed));
    }

    #[tokio::test]
    async fn test_disabled_drops_inbound() {
        let mut transport = Transport::new(config(), loopback_opener(), Taps::new());
        let mut sub = transport.taps().read.subscribe("test");
        let mut written = transport.taps().written.subscribe("test");
        transport.open().await.unwrap();

        transport.taps().enabled.store(false, Ordering::Release);
        transport.send(Bytes::from_static(b"dropped")).await.unwrap();
        assert_eq!(written.recv().await.unwrap(), "dropped");
        tokio::time::sleep(Duration::from_millis(50)).await;
        transport.taps().enabled.store(true, Ordering::Release);
        transport.send(Bytes::from_static(b"kept")).await.unwrap();

        assert_eq!(sub.recv().await.unwrap(), "kept");
        transport.close().await;
    }

    #[tokio::test]
    async fn test_reopen_closes_first() {
        let mut transport = Transport::new(config(), loopback_opener(), Taps::new());
        transport.open().await.unwrap();
        transport.open().await.unwrap();
        assert!(transport.is_open());
        transport.close().await;
        assert!(transport.port().is_none());
    }

    #[tokio::test]
    async fn test_set_config_rejected_while_open() {
        let mut transport = Transport::new(config(), loopback_opener(), Taps::new());
        transport.open().await.unwrap();
        assert!(matches!(transport.set_config(config()), Err(TransportError::Busy)));
        transport.close().await;
        assert!(transport.set_config(config()).is_ok());
    }
}
