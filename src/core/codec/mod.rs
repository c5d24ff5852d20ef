//! Text and byte conversions used by the send and display paths
//!
//! Supported formats:
//! - Numeric literals (binary, octal, decimal, hexadecimal)
//! - Character encodings (ASCII, UTF-8, Latin-1)
//! - Base64
//!
//! Prefixes and suffixes are written in a small escape language, see
//! [`cook_escapes`].

mod numeric;
mod text;

pub use numeric::{format_literals, parse_literals, Radix};
pub use text::{cook_escapes, cooked_affixes, encode_cooked};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tracing::warn;

/// Text format selector with persisted integer ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum TextFormat {
    /// Space separated 8-digit binary literals
    Bin = 0,
    /// Space separated 3-digit octal literals
    Oct = 1,
    /// Space separated decimal literals
    Dec = 2,
    /// Space separated uppercase hex literals
    Hex = 3,
    /// 7-bit ASCII
    Ascii = 4,
    /// UTF-8 text
    #[default]
    Utf8 = 5,
    /// ISO-8859-1 text
    Latin1 = 6,
    /// Standard padded Base64
    Base64 = 7,
}

impl TextFormat {
    /// All formats in id order
    pub fn all() -> &'static [TextFormat] {
        &[
            Self::Bin,
            Self::Oct,
            Self::Dec,
            Self::Hex,
            Self::Ascii,
            Self::Utf8,
            Self::Latin1,
            Self::Base64,
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

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            Self::Bin => "Bin",
            Self::Oct => "Oct",
            Self::Dec => "Dec",
            Self::Hex => "Hex",
            Self::Ascii => "ASCII",
            Self::Utf8 => "UTF-8",
            Self::Latin1 => "Latin-1",
            Self::Base64 => "Base64",
        }
    }

    fn radix(self) -> Option<Radix> {
        match self {
            Self::Bin => Some(Radix::Bin),
            Self::Oct => Some(Radix::Oct),
            Self::Dec => Some(Radix::Dec),
            Self::Hex => Some(Radix::Hex),
            _ => None,
        }
    }
}

/// Convert user text to bytes
pub fn encode(text: &str, format: TextFormat) -> Bytes {
    if let Some(radix) = format.radix() {
        return Bytes::from(parse_literals(text, radix));
    }

    match format {
        TextFormat::Ascii => text
            .chars()
            .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
            .collect::<Vec<u8>>()
            .into(),
        TextFormat::Latin1 => text
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect::<Vec<u8>>()
            .into(),
        TextFormat::Base64 => match BASE64.decode(text.trim()) {
            Ok(bytes) => bytes.into(),
            Err(e) => {
                warn!("Invalid base64 input: {}", e);
                Bytes::new()
            }
        },
        _ => Bytes::copy_from_slice(text.as_bytes()),
    }
}

/// Render bytes as text
pub fn decode(data: &[u8], format: TextFormat) -> String {
    if let Some(radix) = format.radix() {
        return format_literals(data, radix);
    }

    match format {
        TextFormat::Ascii => data
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { char::REPLACEMENT_CHARACTER })
            .collect(),
        TextFormat::Latin1 => data.iter().map(|&b| char::from(b)).collect(),
        TextFormat::Base64 => BASE64.encode(data),
        _ => String::from_utf8_lossy(data).into_owned(),
    }
}

/// Format bytes as a hexdump (like xxd)
pub fn hexdump(data: &[u8], bytes_per_line: usize) -> String {
    let width = bytes_per_line.max(1);
    let mut output = String::new();

    for (line, chunk) in data.chunks(width).enumerate() {
        let _ = write!(output, "{:08x}  ", line * width);

        for i in 0..width {
            match chunk.get(i) {
                Some(byte) => {
                    let _ = write!(output, "{byte:02x} ");
                }
                None => output.push_str("   "),
            }
            if width > 1 && i == width / 2 - 1 {
                output.push(' ');
            }
        }

        output.push('|');
        for &byte in chunk {
            if byte.is_ascii_graphic() || byte == b' ' {
                output.push(byte as char);
            } else {
                output.push('.');
            }
        }
        output.push_str("|\n");
    }

    output
}
