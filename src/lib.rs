//! # xTools Core Library
//!
//! The communication core of an engineering terminal:
//! - Serial ports and HID devices
//! - UDP client/server with broadcast and multicast
//! - TCP client/server
//! - WebSocket client/server
//! - A chart test-data generator
//!
//! ## Features
//!
//! - One generic driver task per open transport
//! - Text codecs (bin/oct/dec/hex/ASCII/UTF-8/Latin-1/Base64) and escape sequences
//! - Frame assembly with 20 checksum algorithms
//! - Fan-out of inbound and outbound bytes to any number of consumers
//! - Emitter, responder, presets and repeaters
//! - Traffic logging
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xtools_core::{DeviceSession, TcpClientConfig, TransportConfig, TransportRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let registry = Arc::new(TransportRegistry::with_builtin());
//!     let config = TransportConfig::TcpClient(TcpClientConfig::new("127.0.0.1", 54321));
//!     let mut session = DeviceSession::new(registry, config);
//!     let mut inbound = session.read_router().subscribe("example");
//!
//!     session.open_device().await?;
//!     session.input_bytes(bytes::Bytes::from_static(b"AT\r\n"));
//!
//!     while let Some(chunk) = inbound.recv().await {
//!         println!("Received: {:?}", chunk);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::codec::{decode, encode, TextFormat};
pub use crate::core::logger::{DataLogConfig, DataLogger, LogFormat};
pub use crate::core::protocol::{ChecksumAlgorithm, ChecksumContext, Frame, FrameParameters};
pub use crate::core::router::{ByteSink, Router};
pub use crate::core::session::{DeviceSession, SessionHandle};
pub use crate::core::statistics::{Statistician, StatisticsSnapshot};
pub use crate::core::transport::{
    TcpClientConfig, Transport, TransportConfig, TransportError, TransportEvent, TransportKind,
    TransportRegistry, TransportState,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
