//! Core module containing the communication engine of xTools
//!
//! This module provides:
//! - Transport layer for the supported endpoint kinds (serial, HID, UDP, TCP, WebSocket)
//! - Device session owning one transport at a time
//! - Codec for text formats and escape sequences
//! - Checksums and frame assembly
//! - Traffic statistics and fan-out routing
//! - Presets, emitter, responder and repeaters
//! - Chart sample parsing
//! - Traffic logging to file

pub mod chart;
pub mod codec;
pub mod emitter;
pub mod logger;
pub mod preset;
pub mod protocol;
pub mod repeater;
pub mod responder;
pub mod router;
pub mod session;
pub mod statistics;
pub mod transport;
