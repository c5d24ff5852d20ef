//! Transport layer for the supported endpoint kinds
//!
//! Supports:
//! - Serial ports
//! - HID devices
//! - UDP client/server (broadcast, multicast)
//! - TCP client/server
//! - WebSocket client/server
//! - A chart test-data generator
//!
//! Each kind implements the small [`Link`] capability trait. A single
//! generic driver ([`Transport`]) runs any link on its own task, owns the
//! peer table and publishes [`TransportEvent`]s.

mod config;
mod driver;
mod registry;
mod tcp;
mod udp;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "hid")]
mod hid;
#[cfg(feature = "serial")]
mod serial;
#[cfg(feature = "websocket")]
mod websocket;

pub use config::{
    ChartsDataFormat, ChartsTestConfig, HidConfig, MulticastConfig, SerialConfig,
    SerialFlowControl, SerialParity, TcpClientConfig, TcpServerConfig, TransportConfig,
    UdpClientConfig, UdpServerConfig, WebSocketClientConfig, WebSocketMessageType,
    WebSocketServerConfig,
};
pub use driver::{CommandPort, Taps, Transport, CLOSE_TIMEOUT};
pub use registry::{OpenFuture, Opener, TransportRegistry};

#[cfg(feature = "charts-test")]
pub use charts_test::{generate_binary_y, generate_text_y};
#[cfg(feature = "serial")]
pub use serial::{list_ports, PortInfo};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Transport kind with persisted integer ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum TransportKind {
    /// Serial port
    SerialPort = 0,
    /// HID device
    Hid = 1,
    /// UDP client
    UdpClient = 2,
    /// UDP server
    UdpServer = 3,
    /// TCP client
    TcpClient = 4,
    /// TCP server
    TcpServer = 5,
    /// WebSocket client
    WebSocketClient = 6,
    /// WebSocket server
    WebSocketServer = 7,
    /// Chart test-data generator
    ChartsTest = 8,
}

impl TransportKind {
    /// All kinds in id order
    pub fn all() -> &'static [TransportKind] {
        &[
            Self::SerialPort,
            Self::Hid,
            Self::UdpClient,
            Self::UdpServer,
            Self::TcpClient,
            Self::TcpServer,
            Self::WebSocketClient,
            Self::WebSocketServer,
            Self::ChartsTest,
        ]
    }

    /// Look up by persisted id
    pub fn from_id(id: u32) -> Option<Self> {
        Self::all().get(usize::try_from(id).ok()?).copied()
    }

    /// Persisted id
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Kinds that accept several peers
    pub fn is_server(self) -> bool {
        matches!(self, Self::UdpServer | Self::TcpServer | Self::WebSocketServer)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SerialPort => "Serial Port",
            Self::Hid => "HID",
            Self::UdpClient => "UDP Client",
            Self::UdpServer => "UDP Server",
            Self::TcpClient => "TCP Client",
            Self::TcpServer => "TCP Server",
            Self::WebSocketClient => "WebSocket Client",
            Self::WebSocketServer => "WebSocket Server",
            Self::ChartsTest => "Charts Test",
        };
        f.write_str(name)
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Port already in use
    #[error("Port already in use: {0}")]
    PortInUse(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Kind not registered or not compiled in
    #[error("Unsupported transport type: {0}")]
    UnsupportedType(TransportKind),

    /// Configuration cannot change while open
    #[error("Transport is open")]
    Busy,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Disconnected
    #[error("Disconnected")]
    Disconnected,

    /// Send error
    #[error("Send error: {0}")]
    SendError(String),

    /// Receive error
    #[error("Receive error: {0}")]
    ReceiveError(String),
}

impl TransportError {
    /// Map a connect-time I/O error to a more specific variant
    pub fn from_connect(target: &str, err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => Self::PortNotFound(target.to_string()),
            ErrorKind::PermissionDenied => Self::PermissionDenied(target.to_string()),
            ErrorKind::AddrInUse => Self::PortInUse(target.to_string()),
            _ => Self::ConnectionFailed(format!("{target}: {err}")),
        }
    }
}

/// Transport lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TransportState {
    /// Not running
    #[default]
    Closed,
    /// Task started, endpoint not yet ready
    Opening,
    /// Endpoint ready
    Open,
    /// Shutting down
    Closing,
    /// Failed; returns to `Closed`
    Error,
}

/// Peer identifier, unique within one open transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Connected peer of a server transport
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerInfo {
    /// Identifier
    pub id: PeerId,
    /// Remote address
    pub address: String,
    /// Time the peer was first seen
    pub connected_at: DateTime<Local>,
    /// Bytes received from the peer
    pub rx_bytes: u64,
    /// Bytes sent to the peer
    pub tx_bytes: u64,
}

/// Write destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// Every peer (or the single remote of a client)
    #[default]
    Broadcast,
    /// One peer of a server transport
    Peer(PeerId),
}

/// One successful delivery of a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// Peer written to, `None` for client kinds
    pub peer: Option<PeerId>,
    /// Destination description
    pub to: String,
}

impl Delivered {
    /// Delivery to the single remote of a client link
    pub fn remote(to: impl Into<String>) -> Self {
        Self {
            peer: None,
            to: to.into(),
        }
    }
}

/// Events published by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Transport is open
    Opened {
        /// Endpoint description
        description: String,
    },
    /// Transport closed
    Closed,
    /// Fatal error; the transport closes
    Error(String),
    /// Degraded operation
    Warning(String),
    /// Inbound bytes
    BytesRead {
        /// Payload
        bytes: Bytes,
        /// Source description
        from: String,
        /// Source peer for server kinds
        peer: Option<PeerId>,
    },
    /// Outbound bytes
    BytesWritten {
        /// Payload
        bytes: Bytes,
        /// Destination description
        to: String,
    },
    /// Peer connected
    PeerConnected(PeerInfo),
    /// Peer disconnected
    PeerDisconnected(PeerId),
}

/// Inbound event produced by a [`Link`]
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Data from the remote side
    Data {
        /// Source description
        from: String,
        /// Source peer for server kinds
        peer: Option<PeerId>,
        /// Payload
        bytes: Bytes,
    },
    /// New peer
    PeerConnected {
        /// Identifier
        id: PeerId,
        /// Remote address
        address: String,
    },
    /// Peer gone
    PeerDisconnected(PeerId),
    /// Transient problem
    Warning(String),
}

/// An open endpoint.
///
/// `recv` must be cancel safe: the driver drops it whenever a command or
/// cancellation wins the race. An `Err` from any method is fatal and closes
/// the transport; transient problems are reported as
/// [`LinkEvent::Warning`].
#[async_trait]
pub trait Link: Send {
    /// Wait for the next inbound event
    async fn recv(&mut self) -> Result<LinkEvent, TransportError>;

    /// Write to one or all peers
    async fn write(&mut self, target: Target, bytes: &Bytes) -> Result<Vec<Delivered>, TransportError>;

    /// Release the endpoint
    async fn shutdown(&mut self) {}

    /// Endpoint description used in logs and the `Opened` event
    fn describe(&self) -> String;
}
