//! Application settings

use crate::core::codec::TextFormat;
use crate::core::emitter::EmitterItem;
use crate::core::logger::DataLogConfig;
use crate::core::preset::Presets;
use crate::core::protocol::FrameParameters;
use crate::core::repeater::RepeaterConfig;
use crate::core::responder::ResponderItem;
use crate::core::transport::{TransportConfig, TransportKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Settings persistence errors
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Diagnostic logging
    pub logging: LoggingConfig,
    /// Transport opened by `run`
    pub transport: TransportConfig,
    /// Remembered configurations, one per kind
    pub saved_transports: Vec<TransportConfig>,
    /// Composer input
    pub input: InputConfig,
    /// Rendering of traffic
    pub output: OutputConfig,
    /// Frames sent on demand
    pub presets: Presets,
    /// Periodic frames
    pub emitter: Vec<EmitterItem>,
    /// Automatic replies
    pub responder: Vec<ResponderItem>,
    /// Bridged secondary transports
    pub repeaters: Vec<RepeaterConfig>,
    /// Traffic log file
    pub data_log: DataLogConfig,
}

impl AppConfig {
    /// Default location, `config.toml` in the project config dir
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        super::config_dir()
            .map(|dir| dir.join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from the default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::default_path()?)
    }

    /// Save to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::default_path()?)
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(io)?;
        info!(path = %path.display(), "config saved");
        Ok(())
    }

    /// Remembered configuration for `kind`, falling back to its default
    pub fn saved_for(&self, kind: TransportKind) -> TransportConfig {
        if self.transport.kind() == kind {
            return self.transport.clone();
        }
        self.saved_transports
            .iter()
            .find(|c| c.kind() == kind)
            .cloned()
            .unwrap_or_else(|| TransportConfig::default_for(kind))
    }

    /// Remember `config`, replacing an earlier one of the same kind
    pub fn remember(&mut self, config: TransportConfig) {
        let kind = config.kind();
        match self.saved_transports.iter_mut().find(|c| c.kind() == kind) {
            Some(existing) => *existing = config,
            None => self.saved_transports.push(config),
        }
    }

    /// Switch the active transport to `kind`, remembering the current one
    pub fn switch_to(&mut self, kind: TransportKind) {
        if self.transport.kind() == kind {
            return;
        }
        let next = self.saved_for(kind);
        let previous = std::mem::replace(&mut self.transport, next);
        self.remember(previous);
    }
}

/// Diagnostic logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Also write a daily rolling log file
    pub file: bool,
    /// Directory of the log file, the project data dir when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: false,
            directory: None,
            json: false,
        }
    }
}

/// Composer input
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Frame sent from the composer
    pub frame: FrameParameters,
    /// Resend the frame at this period
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_interval_ms: Option<u64>,
}

/// Rendering of traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Format inbound and outbound bytes are shown in
    pub text_format: TextFormat,
    /// Show written bytes too
    pub show_tx: bool,
    /// Prefix lines with the local time
    pub timestamps: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            text_format: TextFormat::Hex,
            show_tx: true,
            timestamps: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{TcpServerConfig, UdpClientConfig};

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.transport = TransportConfig::TcpServer(TcpServerConfig::new("0.0.0.0", 7000));
        config.input.cycle_interval_ms = Some(500);
        config.save_to(&path).unwrap();

        assert_eq!(AppConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "transport = 5").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_switch_remembers_previous() {
        let mut config = AppConfig::default();
        config.transport = TransportConfig::UdpClient(UdpClientConfig::new("10.0.0.2", 9));

        config.switch_to(TransportKind::TcpServer);
        assert_eq!(config.transport.kind(), TransportKind::TcpServer);

        config.switch_to(TransportKind::UdpClient);
        assert_eq!(
            config.transport,
            TransportConfig::UdpClient(UdpClientConfig::new("10.0.0.2", 9))
        );
        assert_eq!(config.saved_transports.len(), 2);
    }
}
