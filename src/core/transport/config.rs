//! Typed configuration for every transport kind

use super::{TransportError, TransportKind};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(TransportError::InvalidConfiguration(format!("parity '{other}'"))),
        }
    }
}

/// Serial port configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
}

impl SerialConfig {
    /// Create a new serial configuration with 8N1 framing
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        if cfg!(windows) {
            Self::new("COM1", 9600)
        } else {
            Self::new("/dev/ttyUSB0", 9600)
        }
    }
}

/// HID device configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HidConfig {
    /// USB vendor id
    pub vendor_id: u16,
    /// USB product id
    pub product_id: u16,
    /// Serial number to pick one of several identical devices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Report id prepended to every write
    #[serde(default)]
    pub report_id: u8,
}

/// UDP client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpClientConfig {
    /// Remote host
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Allow sending to broadcast addresses
    #[serde(default)]
    pub broadcast: bool,
}

impl UdpClientConfig {
    /// Create a new UDP client configuration
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            broadcast: false,
        }
    }

    /// Enable broadcast
    #[must_use]
    pub fn broadcast(mut self, enable: bool) -> Self {
        self.broadcast = enable;
        self
    }
}

impl Default for UdpClientConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 54321)
    }
}

/// Multicast group membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MulticastConfig {
    /// Group address (224.0.0.0/4)
    pub group: Ipv4Addr,
    /// Local interface address
    #[serde(default = "unspecified")]
    pub interface: Ipv4Addr,
}

fn unspecified() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

/// UDP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpServerConfig {
    /// Local address
    pub bind_host: String,
    /// Local port (0 picks a free port)
    pub port: u16,
    /// Multicast group to join
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multicast: Option<MulticastConfig>,
    /// Most peers remembered at once; the least recently heard is
    /// forgotten to make room
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// Forget a peer after this many seconds without a datagram
    #[serde(default = "default_peer_idle")]
    pub peer_idle_secs: u64,
}

fn default_max_peers() -> usize {
    1024
}

fn default_peer_idle() -> u64 {
    600
}

impl UdpServerConfig {
    /// Create a new UDP server configuration
    pub fn new(bind_host: &str, port: u16) -> Self {
        Self {
            bind_host: bind_host.to_string(),
            port,
            multicast: None,
            max_peers: default_max_peers(),
            peer_idle_secs: default_peer_idle(),
        }
    }

    /// Bound the learned peer table
    #[must_use]
    pub fn peer_limits(mut self, max_peers: usize, idle_secs: u64) -> Self {
        self.max_peers = max_peers;
        self.peer_idle_secs = idle_secs;
        self
    }

    /// Join a multicast group
    #[must_use]
    pub fn multicast(mut self, group: Ipv4Addr, interface: Ipv4Addr) -> Self {
        self.multicast = Some(MulticastConfig { group, interface });
        self
    }
}

impl Default for UdpServerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", 54321)
    }
}

/// TCP client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpClientConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    10
}

impl TcpClientConfig {
    /// Create a new TCP client configuration
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout_secs: default_timeout(),
        }
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 54321)
    }
}

/// TCP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpServerConfig {
    /// Local address
    pub bind_host: String,
    /// Local port (0 picks a free port)
    pub port: u16,
}

impl TcpServerConfig {
    /// Create a new TCP server configuration
    pub fn new(bind_host: &str, port: u16) -> Self {
        Self {
            bind_host: bind_host.to_string(),
            port,
        }
    }
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self::new("0.0.0.0", 54321)
    }
}

/// WebSocket frame type used for writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebSocketMessageType {
    /// Binary frames
    #[default]
    Binary,
    /// Text frames (payload decoded as UTF-8, lossy)
    Text,
}

/// WebSocket client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketClientConfig {
    /// Server URL (`ws://` or `wss://`)
    pub url: String,
    /// Frame type for writes
    #[serde(default)]
    pub message_type: WebSocketMessageType,
    /// Basic auth user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Basic auth password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl WebSocketClientConfig {
    /// Create a new WebSocket client configuration
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            message_type: WebSocketMessageType::Binary,
            username: None,
            password: None,
        }
    }

    /// Set Basic auth credentials
    #[must_use]
    pub fn credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }
}

impl Default for WebSocketClientConfig {
    fn default() -> Self {
        Self::new("ws://127.0.0.1:54321")
    }
}

/// WebSocket server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSocketServerConfig {
    /// Local address
    pub bind_host: String,
    /// Local port (0 picks a free port)
    pub port: u16,
    /// Frame type for writes
    #[serde(default)]
    pub message_type: WebSocketMessageType,
}

impl Default for WebSocketServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 54321,
            message_type: WebSocketMessageType::Binary,
        }
    }
}

/// Generated chart data format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartsDataFormat {
    /// One little-endian f32 per channel, then `00 00 80 7F`
    #[default]
    BinaryY,
    /// Comma separated values with three decimals, then `\n`
    TextY,
}

/// Chart test generator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartsTestConfig {
    /// Output format
    pub data_format: ChartsDataFormat,
    /// Number of channels (1..=16)
    pub channels: u8,
    /// Interval between samples
    pub interval_ms: u64,
}

impl Default for ChartsTestConfig {
    fn default() -> Self {
        Self {
            data_format: ChartsDataFormat::BinaryY,
            channels: 4,
            interval_ms: 50,
        }
    }
}

/// Configuration of one transport, tagged by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Serial port
    SerialPort(SerialConfig),
    /// HID device
    Hid(HidConfig),
    /// UDP client
    UdpClient(UdpClientConfig),
    /// UDP server
    UdpServer(UdpServerConfig),
    /// TCP client
    TcpClient(TcpClientConfig),
    /// TCP server
    TcpServer(TcpServerConfig),
    /// WebSocket client
    WebSocketClient(WebSocketClientConfig),
    /// WebSocket server
    WebSocketServer(WebSocketServerConfig),
    /// Chart test-data generator
    ChartsTest(ChartsTestConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::TcpClient(TcpClientConfig::default())
    }
}

impl TransportConfig {
    /// Default configuration for a kind
    pub fn default_for(kind: TransportKind) -> Self {
        match kind {
            TransportKind::SerialPort => Self::SerialPort(SerialConfig::default()),
            TransportKind::Hid => Self::Hid(HidConfig::default()),
            TransportKind::UdpClient => Self::UdpClient(UdpClientConfig::default()),
            TransportKind::UdpServer => Self::UdpServer(UdpServerConfig::default()),
            TransportKind::TcpClient => Self::TcpClient(TcpClientConfig::default()),
            TransportKind::TcpServer => Self::TcpServer(TcpServerConfig::default()),
            TransportKind::WebSocketClient => {
                Self::WebSocketClient(WebSocketClientConfig::default())
            }
            TransportKind::WebSocketServer => {
                Self::WebSocketServer(WebSocketServerConfig::default())
            }
            TransportKind::ChartsTest => Self::ChartsTest(ChartsTestConfig::default()),
        }
    }

    /// Kind of this configuration
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::SerialPort(_) => TransportKind::SerialPort,
            Self::Hid(_) => TransportKind::Hid,
            Self::UdpClient(_) => TransportKind::UdpClient,
            Self::UdpServer(_) => TransportKind::UdpServer,
            Self::TcpClient(_) => TransportKind::TcpClient,
            Self::TcpServer(_) => TransportKind::TcpServer,
            Self::WebSocketClient(_) => TransportKind::WebSocketClient,
            Self::WebSocketServer(_) => TransportKind::WebSocketServer,
            Self::ChartsTest(_) => TransportKind::ChartsTest,
        }
    }

    /// Short endpoint description
    pub fn endpoint(&self) -> String {
        match self {
            Self::SerialPort(c) => format!("{}@{}", c.port, c.baud_rate),
            Self::Hid(c) => format!("{:04x}:{:04x}", c.vendor_id, c.product_id),
            Self::UdpClient(c) => format!("{}:{}", c.host, c.port),
            Self::UdpServer(c) => format!("{}:{}", c.bind_host, c.port),
            Self::TcpClient(c) => format!("{}:{}", c.host, c.port),
            Self::TcpServer(c) => format!("{}:{}", c.bind_host, c.port),
            Self::WebSocketClient(c) => c.url.clone(),
            Self::WebSocketServer(c) => format!("{}:{}", c.bind_host, c.port),
            Self::ChartsTest(c) => format!("{} channels", c.channels),
        }
    }

    /// Check the configuration before a transport task starts
    pub fn validate(&self) -> Result<(), TransportError> {
        let invalid = |msg: &str| Err(TransportError::InvalidConfiguration(msg.to_string()));

        match self {
            Self::SerialPort(c) => {
                if c.port.trim().is_empty() {
                    return invalid("serial port name is empty");
                }
                if c.baud_rate == 0 {
                    return invalid("baud rate must be positive");
                }
                if !(5..=8).contains(&c.data_bits) {
                    return invalid("data bits must be 5..=8");
                }
                if !(1..=2).contains(&c.stop_bits) {
                    return invalid("stop bits must be 1 or 2");
                }
            }
            Self::Hid(c) => {
                if c.vendor_id == 0 && c.product_id == 0 {
                    return invalid("HID vendor and product id are not set");
                }
            }
            Self::UdpClient(c) => {
                if c.host.trim().is_empty() || c.port == 0 {
                    return invalid("UDP client needs a host and a non-zero port");
                }
            }
            Self::UdpServer(c) => {
                if c.bind_host.trim().is_empty() {
                    return invalid("bind host is empty");
                }
                if c.max_peers == 0 || c.peer_idle_secs == 0 {
                    return invalid("UDP peer limits must be positive");
                }
                if let Some(m) = &c.multicast {
                    if !m.group.is_multicast() {
                        return invalid("multicast group is not a multicast address");
                    }
                }
            }
            Self::TcpClient(c) => {
                if c.host.trim().is_empty() || c.port == 0 {
                    return invalid("TCP client needs a host and a non-zero port");
                }
                if c.timeout_secs == 0 {
                    return invalid("connect timeout must be positive");
                }
            }
            Self::TcpServer(c) => {
                if c.bind_host.trim().is_empty() {
                    return invalid("bind host is empty");
                }
            }
            Self::WebSocketClient(c) => {
                if !(c.url.starts_with("ws://") || c.url.starts_with("wss://")) {
                    return invalid("WebSocket URL must start with ws:// or wss://");
                }
                if c.password.is_some() && c.username.is_none() {
                    return invalid("password given without user name");
                }
            }
            Self::WebSocketServer(c) => {
                if c.bind_host.trim().is_empty() {
                    return invalid("bind host is empty");
                }
            }
            Self::ChartsTest(c) => {
                if !(1..=16).contains(&c.channels) {
                    return invalid("channels must be 1..=16");
                }
                if c.interval_ms == 0 {
                    return invalid("interval must be positive");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        for &kind in TransportKind::all() {
            let config = TransportConfig::default_for(kind);
            assert_eq!(config.kind(), kind);
            if kind != TransportKind::Hid {
                assert!(config.validate().is_ok(), "{kind}");
            }
        }
    }

    #[test]
    fn test_invalid_configs() {
        let bad = [
            TransportConfig::TcpClient(TcpClientConfig::new("", 80)),
            TransportConfig::TcpClient(TcpClientConfig::new("host", 0)),
            TransportConfig::SerialPort(SerialConfig::new("COM1", 9600).data_bits(9)),
            TransportConfig::WebSocketClient(WebSocketClientConfig::new("http://x")),
            TransportConfig::UdpServer(
                UdpServerConfig::new("0.0.0.0", 1).multicast(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::UNSPECIFIED),
            ),
            TransportConfig::UdpServer(UdpServerConfig::new("0.0.0.0", 1).peer_limits(0, 60)),
            TransportConfig::ChartsTest(ChartsTestConfig {
                channels: 0,
                ..Default::default()
            }),
            TransportConfig::Hid(HidConfig::default()),
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(TransportError::InvalidConfiguration(_))),
                "{config:?}"
            );
        }
    }

    #[test]
    fn test_tagged_json() {
        let config = TransportConfig::TcpServer(TcpServerConfig::new("127.0.0.1", 9000));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""type":"tcp_server""#));
        let back: TransportConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let parsed: TransportConfig =
            serde_json::from_str(r#"{"type":"tcp_client","host":"h","port":1}"#).unwrap();
        assert_eq!(parsed, TransportConfig::TcpClient(TcpClientConfig::new("h", 1)));
    }

    #[test]
    fn test_parity_from_str() {
        assert_eq!("E".parse::<SerialParity>().unwrap(), SerialParity::Even);
        assert!("mark".parse::<SerialParity>().is_err());
    }
}
