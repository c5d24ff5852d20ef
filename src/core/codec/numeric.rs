//! Whitespace separated numeric byte literals

use std::fmt::Write as _;
use tracing::warn;

/// Literal radix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Radix {
    /// Base 2, rendered with 8 digits
    Bin,
    /// Base 8, rendered with 3 digits
    Oct,
    /// Base 10, no padding
    Dec,
    /// Base 16, rendered with 2 uppercase digits
    Hex,
}

impl Radix {
    fn base(self) -> u32 {
        match self {
            Self::Bin => 2,
            Self::Oct => 8,
            Self::Dec => 10,
            Self::Hex => 16,
        }
    }

    fn strip_prefix(self, token: &str) -> &str {
        let prefix = match self {
            Self::Bin => ["0b", "0B"],
            Self::Oct => ["0o", "0O"],
            Self::Hex => ["0x", "0X"],
            Self::Dec => return token,
        };
        prefix
            .iter()
            .find_map(|p| token.strip_prefix(p))
            .unwrap_or(token)
    }
}

/// Parse whitespace separated literals into bytes.
///
/// Hex tokens longer than two digits are split into byte pairs, so
/// `"0102"` and `"01 02"` are equivalent. Invalid tokens are skipped.
pub fn parse_literals(text: &str, radix: Radix) -> Vec<u8> {
    let mut out = Vec::new();

    for token in text.split(|c: char| c.is_whitespace() || c == ',') {
        let token = radix.strip_prefix(token);
        if token.is_empty() {
            continue;
        }

        if radix == Radix::Hex && token.len() > 2 {
            if token.len() % 2 == 0 {
                if let Ok(bytes) = hex::decode(token) {
                    out.extend(bytes);
                    continue;
                }
            }
            warn!("Skipping invalid hex literal: {}", token);
            continue;
        }

        match u8::from_str_radix(token, radix.base()) {
            Ok(byte) => out.push(byte),
            Err(_) => warn!("Skipping invalid literal: {}", token),
        }
    }

    out
}

/// Render bytes as space separated literals
pub fn format_literals(data: &[u8], radix: Radix) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = match radix {
            Radix::Bin => write!(out, "{byte:08b}"),
            Radix::Oct => write!(out, "{byte:03o}"),
            Radix::Dec => write!(out, "{byte}"),
            Radix::Hex => write!(out, "{byte:02X}"),
        };
    }
    out
}
