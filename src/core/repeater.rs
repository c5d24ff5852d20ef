//! Secondary transports bridged to a session
//!
//! Bytes the session receives are written to every open repeater, and
//! bytes a repeater receives are fed into the session as input. Repeaters
//! forward raw bytes without framing.

use super::router::{ByteSink, ConsumerId, Router};
use super::session::SessionHandle;
use super::transport::{
    CommandPort, Target, Taps, Transport, TransportConfig, TransportError, TransportRegistry,
    TransportState,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Saved repeater
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeaterConfig {
    /// Skipped by [`RepeaterSet::open_all`] when false
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Display name
    #[serde(default)]
    pub description: String,
    /// Endpoint of the secondary transport
    pub transport: TransportConfig,
}

fn enabled() -> bool {
    true
}

impl RepeaterConfig {
    /// Enabled repeater over `transport`
    pub fn new(description: &str, transport: TransportConfig) -> Self {
        Self {
            enabled: true,
            description: description.to_string(),
            transport,
        }
    }
}

/// Forwards routed chunks into a transport's command queue
struct PortSink {
    port: CommandPort,
}

impl ByteSink for PortSink {
    fn input_bytes(&self, bytes: &Bytes) {
        if let Err(e) = self.port.try_write(Target::Broadcast, bytes.clone()) {
            debug!("repeater dropped {} bytes: {}", bytes.len(), e);
        }
    }
}

/// One open bridge
pub struct Repeater {
    config: RepeaterConfig,
    transport: Transport,
    source: Router,
    forward: Option<ConsumerId>,
}

impl std::fmt::Debug for Repeater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repeater")
            .field("description", &self.config.description)
            .field("state", &self.transport.state())
            .finish_non_exhaustive()
    }
}

impl Repeater {
    /// Open the secondary transport and bridge it with the session
    /// reachable through `source` (its inbound router) and `sink`.
    pub async fn open(
        registry: &TransportRegistry,
        config: RepeaterConfig,
        source: &Router,
        sink: SessionHandle,
    ) -> Result<Self, TransportError> {
        let kind = config.transport.kind();
        let taps = Taps::new();
        taps.read.attach("session", Arc::new(sink));

        let mut transport = registry
            .create_with(config.transport.clone(), taps)
            .ok_or(TransportError::UnsupportedType(kind))?;
        transport.open().await?;

        let forward = transport.port().map(|port| {
            source.attach(
                &format!("repeater:{}", config.description),
                Arc::new(PortSink { port }),
            )
        });
        info!(description = %config.description, endpoint = %config.transport.endpoint(), "repeater open");

        Ok(Self {
            config,
            transport,
            source: source.clone(),
            forward,
        })
    }

    /// Saved configuration
    pub fn config(&self) -> &RepeaterConfig {
        &self.config
    }

    /// Secondary transport state
    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    /// Unhook from the session and close the secondary transport
    pub async fn close(mut self) {
        if let Some(id) = self.forward.take() {
            self.source.detach(id);
        }
        self.transport.close().await;
        info!(description = %self.config.description, "repeater closed");
    }
}

/// Every repeater of one session
#[derive(Debug, Default)]
pub struct RepeaterSet {
    repeaters: Vec<Repeater>,
}

impl RepeaterSet {
    /// Open every enabled configuration. Failures are logged and skipped.
    pub async fn open_all(
        registry: &TransportRegistry,
        configs: &[RepeaterConfig],
        source: &Router,
        sink: &SessionHandle,
    ) -> Self {
        let mut repeaters = Vec::new();
        for config in configs.iter().filter(|c| c.enabled) {
            let description = config.description.clone();
            match Repeater::open(registry, config.clone(), source, sink.clone()).await {
                Ok(repeater) => repeaters.push(repeater),
                Err(e) => warn!(description = %description, "repeater failed to open: {}", e),
            }
        }
        Self { repeaters }
    }

    /// Open repeaters
    pub fn repeaters(&self) -> &[Repeater] {
        &self.repeaters
    }

    /// Number of open repeaters
    pub fn len(&self) -> usize {
        self.repeaters.len()
    }

    /// True when no repeater is open
    pub fn is_empty(&self) -> bool {
        self.repeaters.is_empty()
    }

    /// Close every repeater
    pub async fn close_all(&mut self) {
        for repeater in self.repeaters.drain(..) {
            repeater.close().await;
        }
    }
}
