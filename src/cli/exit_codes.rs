//! Process exit codes of `xtools-cli`
//!
//! Scripts driving the CLI branch on these values, so they never change
//! meaning once published.

use crate::config::ConfigError;
use crate::core::transport::TransportError;
use std::io::ErrorKind;
use std::process::ExitCode;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

#[allow(missing_docs)]
impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const CONNECTION_FAILED: u8 = 3;
    pub const TIMEOUT: u8 = 4;
    pub const FILE_NOT_FOUND: u8 = 6;
    pub const PERMISSION_DENIED: u8 = 7;
    pub const CONFIG_ERROR: u8 = 8;
    /// Serial port or HID device missing
    pub const DEVICE_NOT_FOUND: u8 = 12;
    /// Port or address already taken, or the session refused a change
    pub const DEVICE_BUSY: u8 = 13;
    /// Transport kind not compiled into this binary
    pub const UNSUPPORTED: u8 = 18;
    pub const INTERNAL_ERROR: u8 = 127;
}

const DESCRIPTIONS: &[(u8, &str)] = &[
    (ExitCodes::SUCCESS, "Success"),
    (ExitCodes::ERROR, "General error"),
    (ExitCodes::INVALID_ARGS, "Invalid arguments"),
    (ExitCodes::CONNECTION_FAILED, "Connection failed"),
    (ExitCodes::TIMEOUT, "Connection timeout"),
    (ExitCodes::FILE_NOT_FOUND, "File not found"),
    (ExitCodes::PERMISSION_DENIED, "Permission denied"),
    (ExitCodes::CONFIG_ERROR, "Configuration error"),
    (ExitCodes::DEVICE_NOT_FOUND, "Device not found"),
    (ExitCodes::DEVICE_BUSY, "Device busy"),
    (ExitCodes::UNSUPPORTED, "Transport not supported"),
    (ExitCodes::INTERNAL_ERROR, "Internal error"),
];

/// Human readable meaning of an exit code
pub fn exit_code_description(code: u8) -> &'static str {
    DESCRIPTIONS
        .iter()
        .find(|(c, _)| *c == code)
        .map_or("Unknown error", |&(_, text)| text)
}

/// Outcome of one CLI command
#[derive(Debug)]
pub enum CliResult {
    /// Finished; the message goes to stdout
    Success(Option<String>),
    /// Failed with an exit code; the message goes to stderr
    Error(u8, String),
}

#[allow(missing_docs)]
impl CliResult {
    pub fn success() -> Self {
        Self::Success(None)
    }

    pub fn success_with_message(msg: impl Into<String>) -> Self {
        Self::Success(Some(msg.into()))
    }

    pub fn error(code: u8, msg: impl Into<String>) -> Self {
        Self::Error(code, msg.into())
    }

    /// Process exit code
    pub fn code(&self) -> u8 {
        match self {
            Self::Success(_) => ExitCodes::SUCCESS,
            Self::Error(code, _) => *code,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Success(msg) => msg.as_deref(),
            Self::Error(_, msg) => Some(msg),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn to_exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

fn io_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::NotFound => ExitCodes::FILE_NOT_FOUND,
        ErrorKind::PermissionDenied => ExitCodes::PERMISSION_DENIED,
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => ExitCodes::CONNECTION_FAILED,
        ErrorKind::TimedOut => ExitCodes::TIMEOUT,
        ErrorKind::AddrInUse => ExitCodes::DEVICE_BUSY,
        _ => ExitCodes::ERROR,
    }
}

impl From<std::io::Error> for CliResult {
    fn from(err: std::io::Error) -> Self {
        Self::Error(io_code(err.kind()), err.to_string())
    }
}

impl From<TransportError> for CliResult {
    fn from(err: TransportError) -> Self {
        let code = match &err {
            TransportError::ConnectionFailed(_)
            | TransportError::Disconnected
            | TransportError::NotConnected => ExitCodes::CONNECTION_FAILED,
            TransportError::Timeout(_) => ExitCodes::TIMEOUT,
            TransportError::PortNotFound(_) => ExitCodes::DEVICE_NOT_FOUND,
            TransportError::PermissionDenied(_) => ExitCodes::PERMISSION_DENIED,
            TransportError::PortInUse(_) | TransportError::Busy => ExitCodes::DEVICE_BUSY,
            TransportError::InvalidConfiguration(_) => ExitCodes::CONFIG_ERROR,
            TransportError::UnsupportedType(_) => ExitCodes::UNSUPPORTED,
            TransportError::IoError(e) => io_code(e.kind()),
            TransportError::SendError(_) | TransportError::ReceiveError(_) => ExitCodes::ERROR,
        };
        Self::Error(code, err.to_string())
    }
}

impl From<ConfigError> for CliResult {
    fn from(err: ConfigError) -> Self {
        let code = match &err {
            ConfigError::Io { source, .. } if source.kind() == ErrorKind::PermissionDenied => {
                ExitCodes::PERMISSION_DENIED
            }
            _ => ExitCodes::CONFIG_ERROR,
        };
        Self::Error(code, err.to_string())
    }
}
