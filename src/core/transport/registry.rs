//! Transport factory keyed by kind

use super::{Link, Taps, Transport, TransportConfig, TransportError, TransportKind};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Future resolving to an open link
pub type OpenFuture = BoxFuture<'static, Result<Box<dyn Link>, TransportError>>;

/// Constructor turning a configuration into an open link
pub type Opener = Arc<dyn Fn(TransportConfig) -> OpenFuture + Send + Sync>;

struct Entry {
    kind: TransportKind,
    display_name: String,
    default_config: TransportConfig,
    opener: Opener,
}

/// Registered transport kinds
#[derive(Default)]
pub struct TransportRegistry {
    entries: Vec<Entry>,
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.kind))
            .finish()
    }
}

fn mismatch(expected: TransportKind, config: &TransportConfig) -> TransportError {
    TransportError::InvalidConfiguration(format!(
        "expected {} configuration, got {}",
        expected,
        config.kind()
    ))
}

/// Wrap a typed open function into an [`Opener`]
macro_rules! opener {
    ($variant:ident, $open:path) => {
        Arc::new(|config: TransportConfig| -> OpenFuture {
            Box::pin(async move {
                match config {
                    TransportConfig::$variant(c) => $open(c).await,
                    other => Err(mismatch(TransportKind::$variant, &other)),
                }
            })
        }) as Opener
    };
}

impl TransportRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every kind compiled into this build
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();

        #[cfg(feature = "serial")]
        registry.register(
            TransportKind::SerialPort,
            "Serial Port",
            TransportConfig::default_for(TransportKind::SerialPort),
            opener!(SerialPort, super::serial::open),
        );
        #[cfg(feature = "hid")]
        registry.register(
            TransportKind::Hid,
            "HID",
            TransportConfig::default_for(TransportKind::Hid),
            opener!(Hid, super::hid::open),
        );
        registry.register(
            TransportKind::UdpClient,
            "UDP Client",
            TransportConfig::default_for(TransportKind::UdpClient),
            opener!(UdpClient, super::udp::open_client),
        );
        registry.register(
            TransportKind::UdpServer,
            "UDP Server",
            TransportConfig::default_for(TransportKind::UdpServer),
            opener!(UdpServer, super::udp::open_server),
        );
        registry.register(
            TransportKind::TcpClient,
            "TCP Client",
            TransportConfig::default_for(TransportKind::TcpClient),
            opener!(TcpClient, super::tcp::open_client),
        );
        registry.register(
            TransportKind::TcpServer,
            "TCP Server",
            TransportConfig::default_for(TransportKind::TcpServer),
            opener!(TcpServer, super::tcp::open_server),
        );
        #[cfg(feature = "websocket")]
        {
            registry.register(
                TransportKind::WebSocketClient,
                "WebSocket Client",
                TransportConfig::default_for(TransportKind::WebSocketClient),
                opener!(WebSocketClient, super::websocket::open_client),
            );
            registry.register(
                TransportKind::WebSocketServer,
                "WebSocket Server",
                TransportConfig::default_for(TransportKind::WebSocketServer),
                opener!(WebSocketServer, super::websocket::open_server),
            );
        }
        #[cfg(feature = "charts-test")]
        registry.register(
            TransportKind::ChartsTest,
            "Charts Test",
            TransportConfig::default_for(TransportKind::ChartsTest),
            opener!(ChartsTest, super::charts_test::open),
        );

        registry
    }

    /// Register a kind, replacing an earlier registration of the same kind
    pub fn register(
        &mut self,
        kind: TransportKind,
        display_name: &str,
        default_config: TransportConfig,
        opener: Opener,
    ) {
        let entry = Entry {
            kind,
            display_name: display_name.to_string(),
            default_config,
            opener,
        };
        match self.entries.iter_mut().find(|e| e.kind == kind) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    fn entry(&self, kind: TransportKind) -> Option<&Entry> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    /// Create a closed transport with the kind's default configuration
    pub fn create(&self, kind: TransportKind) -> Option<Transport> {
        let entry = self.entry(kind)?;
        Some(Transport::new(
            entry.default_config.clone(),
            entry.opener.clone(),
            Taps::new(),
        ))
    }

    /// Create a closed transport for `config` publishing through `taps`
    pub fn create_with(&self, config: TransportConfig, taps: Taps) -> Option<Transport> {
        let entry = self.entry(config.kind())?;
        Some(Transport::new(config, entry.opener.clone(), taps))
    }

    /// Registered kinds in registration order
    pub fn supported_types(&self) -> Vec<TransportKind> {
        self.entries.iter().map(|e| e.kind).collect()
    }

    /// Display name of a registered kind
    pub fn display_name(&self, kind: TransportKind) -> Option<&str> {
        self.entry(kind).map(|e| e.display_name.as_str())
    }

    /// Default configuration of a registered kind
    pub fn default_config(&self, kind: TransportKind) -> Option<TransportConfig> {
        self.entry(kind).map(|e| e.default_config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_kinds() {
        let registry = TransportRegistry::with_builtin();
        let kinds = registry.supported_types();
        assert!(kinds.contains(&TransportKind::TcpClient));
        assert!(kinds.contains(&TransportKind::UdpServer));
        assert_eq!(registry.display_name(TransportKind::TcpServer), Some("TCP Server"));
        #[cfg(feature = "hid")]
        {
            assert!(kinds.contains(&TransportKind::Hid));
            assert_eq!(registry.display_name(TransportKind::Hid), Some("HID"));
        }
        #[cfg(not(feature = "hid"))]
        assert!(registry.create(TransportKind::Hid).is_none());
    }

    #[test]
    fn test_empty_registry() {
        let registry = TransportRegistry::new();
        assert!(registry.create(TransportKind::TcpClient).is_none());
        assert!(registry.supported_types().is_empty());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = TransportRegistry::with_builtin();
        let before = registry.supported_types();
        let opener = opener!(TcpClient, super::super::tcp::open_client);
        registry.register(
            TransportKind::TcpClient,
            "Custom",
            TransportConfig::default_for(TransportKind::TcpClient),
            opener,
        );
        assert_eq!(registry.supported_types(), before);
        assert_eq!(registry.display_name(TransportKind::TcpClient), Some("Custom"));
    }

    #[tokio::test]
    async fn test_created_transport_is_closed() {
        let registry = TransportRegistry::with_builtin();
        let transport = registry.create(TransportKind::TcpServer).unwrap();
        assert_eq!(transport.kind(), TransportKind::TcpServer);
        assert!(!transport.is_open());
    }
}
