//! Traffic log written to a file
//!
//! Records rx/tx chunks with a timestamp and the remote endpoint in one of
//! several line formats.

use super::codec::{decode, format_literals, Radix, TextFormat};
use super::transport::TransportEvent;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S%.3f";
const CSV_HEADER: &str = "timestamp,direction,endpoint,hex,text";

/// Line format of the traffic log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Payload decoded with the configured text format
    #[default]
    Text,
    /// Payload as hex bytes
    Hex,
    /// Quoted CSV with both hex and text columns
    Csv,
    /// One JSON object per line
    JsonLines,
}

impl LogFormat {
    /// File extension for the format
    pub fn extension(&self) -> &'static str {
        match self {
            LogFormat::Text => "txt",
            LogFormat::Hex => "hex",
            LogFormat::Csv => "csv",
            LogFormat::JsonLines => "jsonl",
        }
    }

    /// All formats
    pub fn all() -> &'static [LogFormat] {
        &[LogFormat::Text, LogFormat::Hex, LogFormat::Csv, LogFormat::JsonLines]
    }
}

/// Traffic direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from the device
    Rx,
    /// Written to the device
    Tx,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Rx => "RX",
            Direction::Tx => "TX",
        }
    }
}

/// One logged chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Local wall-clock time
    pub timestamp: DateTime<Local>,
    /// Rx or Tx
    pub direction: Direction,
    /// Remote address or device name
    pub endpoint: String,
    /// Payload, hex encoded in JSON
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode_upper(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

impl LogEntry {
    /// Entry stamped now
    pub fn new(direction: Direction, endpoint: &str, data: &[u8]) -> Self {
        Self {
            timestamp: Local::now(),
            direction,
            endpoint: endpoint.to_string(),
            data: data.to_vec(),
        }
    }

    fn prefix(&self, timestamps: bool) -> String {
        if timestamps {
            format!(
                "[{}] {} {}",
                self.timestamp.format(TIMESTAMP),
                self.direction.label(),
                self.endpoint
            )
        } else {
            format!("{} {}", self.direction.label(), self.endpoint)
        }
    }

    /// Render as one line in `format`
    pub fn render(&self, format: LogFormat, text_format: TextFormat, timestamps: bool) -> String {
        match format {
            LogFormat::Text => format!(
                "{}: {}",
                self.prefix(timestamps),
                decode(&self.data, text_format).escape_debug()
            ),
            LogFormat::Hex => format!(
                "{}: {}",
                self.prefix(timestamps),
                format_literals(&self.data, Radix::Hex)
            ),
            LogFormat::Csv => format!(
                "\"{}\",\"{}\",\"{}\",\"{}\",\"{}\"",
                self.timestamp.format(TIMESTAMP),
                self.direction.label(),
                self.endpoint.replace('"', "\"\""),
                hex::encode_upper(&self.data),
                decode(&self.data, text_format).replace('"', "\"\"")
            ),
            LogFormat::JsonLines => serde_json::to_string(self).unwrap_or_default(),
        }
    }
}

/// Saved data log options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLogConfig {
    /// Log traffic while a device is open
    pub enabled: bool,
    /// Log file, appended to
    pub path: PathBuf,
    /// Line format
    pub format: LogFormat,
    /// Decoding of text lines
    pub text_format: TextFormat,
    /// Prefix text and hex lines with a timestamp
    pub timestamps: bool,
}

impl Default for DataLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("xtools-traffic.log"),
            format: LogFormat::Text,
            text_format: TextFormat::Utf8,
            timestamps: true,
        }
    }
}

struct Inner {
    writer: BufWriter<File>,
    lines: usize,
    bytes: usize,
}

/// Thread-safe traffic log
pub struct DataLogger {
    config: DataLogConfig,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for DataLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLogger")
            .field("path", &self.config.path)
            .field("format", &self.config.format)
            .finish_non_exhaustive()
    }
}

impl DataLogger {
    /// Open (or create) the log file for appending
    pub fn open(config: DataLogConfig) -> io::Result<Self> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)?;
        let fresh = file.metadata()?.len() == 0;
        let mut writer = BufWriter::new(file);

        if config.format == LogFormat::Csv && fresh {
            writeln!(writer, "{CSV_HEADER}")?;
        }
        info!(path = %config.path.display(), format = ?config.format, "data log opened");

        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                writer,
                lines: 0,
                bytes: 0,
            }),
        })
    }

    /// Log file path
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Append one chunk
    pub fn log(&self, direction: Direction, endpoint: &str, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let entry = LogEntry::new(direction, endpoint, data);
        let line = entry.render(self.config.format, self.config.text_format, self.config.timestamps);

        let mut inner = self.inner.lock();
        writeln!(inner.writer, "{line}")?;
        inner.lines += 1;
        inner.bytes += data.len();
        if inner.lines % 100 == 0 {
            inner.writer.flush()?;
        }
        Ok(())
    }

    /// Lines and payload bytes written so far
    pub fn stats(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.lines, inner.bytes)
    }

    /// Flush buffered lines to disk
    pub fn flush(&self) -> io::Result<()> {
        self.inner.lock().writer.flush()
    }

    /// Log traffic events until `cancel` fires or the channel closes
    pub fn spawn(
        self: Arc<Self>,
        mut events: broadcast::Receiver<TransportEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                let result = match event {
                    Ok(TransportEvent::BytesRead { bytes, from, .. }) => {
                        self.log(Direction::Rx, &from, &bytes)
                    }
                    Ok(TransportEvent::BytesWritten { bytes, to }) => {
                        self.log(Direction::Tx, &to, &bytes)
                    }
                    Ok(_) => Ok(()),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("data log skipped {} events", n);
                        Ok(())
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if let Err(e) = result {
                    warn!(path = %self.config.path.display(), "data log write failed: {}", e);
                }
            }
            if let Err(e) = self.flush() {
                warn!("data log flush failed: {}", e);
            }
        })
    }
}

impl Drop for DataLogger {
    fn drop(&mut self) {
        let _ = self.inner.get_mut().writer.flush();
    }
}

/// `<prefix>_<YYYYmmdd_HHMMSS>.<ext>`
pub fn log_filename(prefix: &str, format: LogFormat) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{}_{}.{}", prefix, timestamp, format.extension())
}
