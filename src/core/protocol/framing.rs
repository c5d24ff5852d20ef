//! Outgoing frame assembly
//!
//! A frame is `prefix ++ payload ++ checksum? ++ suffix`. The checksum only
//! covers the payload, optionally restricted to an inclusive byte range.

use super::checksum::{calculate, ChecksumAlgorithm, ChecksumContext};
use crate::core::codec::{cooked_affixes, encode, encode_cooked, format_literals, Radix, TextFormat};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Parameters describing how user input becomes a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameParameters {
    /// Format the payload text is written in
    pub text_format: TextFormat,
    /// Cook escape sequences in text payloads
    pub escape: bool,
    /// Prefix in the escape language
    pub prefix: String,
    /// Payload text
    pub payload: String,
    /// Suffix in the escape language
    pub suffix: String,
    /// Insert a checksum between payload and suffix
    pub append_crc: bool,
    /// Checksum algorithm id
    pub crc_algorithm: u32,
    /// Serialize the checksum most significant byte first
    pub crc_big_endian: bool,
    /// First payload byte covered by the checksum
    pub crc_start_index: u32,
    /// Last payload byte covered by the checksum, `None` for the last byte
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc_end_index: Option<u32>,
}

impl Default for FrameParameters {
    fn default() -> Self {
        Self {
            text_format: TextFormat::Utf8,
            escape: false,
            prefix: String::new(),
            payload: String::new(),
            suffix: String::new(),
            append_crc: false,
            crc_algorithm: ChecksumAlgorithm::Crc16Modbus.id(),
            crc_big_endian: true,
            crc_start_index: 0,
            crc_end_index: None,
        }
    }
}

impl FrameParameters {
    /// Create parameters for a payload in the given format
    pub fn new(payload: impl Into<String>, text_format: TextFormat) -> Self {
        Self {
            payload: payload.into(),
            text_format,
            ..Default::default()
        }
    }

    /// Set prefix
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set suffix
    #[must_use]
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Enable escape cooking of the payload
    #[must_use]
    pub fn escape(mut self, escape: bool) -> Self {
        self.escape = escape;
        self
    }

    /// Append a checksum
    #[must_use]
    pub fn crc(mut self, algorithm: ChecksumAlgorithm, big_endian: bool) -> Self {
        self.append_crc = true;
        self.crc_algorithm = algorithm.id();
        self.crc_big_endian = big_endian;
        self
    }

    /// Restrict the checksum to `start..=end` of the payload
    #[must_use]
    pub fn crc_range(mut self, start: u32, end: Option<u32>) -> Self {
        self.crc_start_index = start;
        self.crc_end_index = end;
        self
    }

    /// Encoded payload bytes
    pub fn payload_bytes(&self) -> Bytes {
        if self.escape {
            encode_cooked(&self.payload, self.text_format)
        } else {
            encode(&self.payload, self.text_format)
        }
    }

    /// Checksum over the payload as configured
    pub fn checksum(&self, payload: &[u8]) -> Vec<u8> {
        let ctx = ChecksumContext {
            algorithm: self.crc_algorithm,
            start_index: self.crc_start_index as usize,
            end_index: self.crc_end_index.map_or(usize::MAX, |end| end as usize),
            big_endian: self.crc_big_endian,
            data: payload,
        };
        calculate(&ctx)
    }

    /// Resolve all parts of the frame
    pub fn compose(&self) -> Frame {
        let payload = self.payload_bytes();
        let crc = if self.append_crc {
            Bytes::from(self.checksum(&payload))
        } else {
            Bytes::new()
        };

        Frame {
            prefix: cooked_affixes(&self.prefix),
            payload,
            crc,
            suffix: cooked_affixes(&self.suffix),
            crc_big_endian: self.crc_big_endian,
        }
    }

    /// Build the wire bytes
    pub fn to_bytes(&self) -> Bytes {
        self.compose().to_bytes()
    }
}

/// Resolved parts of a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Prefix bytes
    pub prefix: Bytes,
    /// Payload bytes
    pub payload: Bytes,
    /// Checksum bytes, empty when disabled
    pub crc: Bytes,
    /// Suffix bytes
    pub suffix: Bytes,
    crc_big_endian: bool,
}

impl Frame {
    /// Concatenate all parts
    pub fn to_bytes(&self) -> Bytes {
        let checksum = (!self.crc.is_empty()).then_some(&self.crc[..]);
        build_frame(&self.prefix, &self.payload, checksum, &self.suffix)
    }

    /// `[PREFIX][PAYLOAD][CRC][SUFFIX]` in uppercase hex
    pub fn preview(&self) -> String {
        let part = |b: &Bytes| format_literals(b, Radix::Hex);
        format!(
            "[{}][{}][{}][{}]",
            part(&self.prefix),
            part(&self.payload),
            part(&self.crc),
            part(&self.suffix)
        )
    }

    /// Checksum label, always shown most significant byte first
    pub fn crc_label(&self) -> String {
        let mut crc = self.crc.to_vec();
        if !self.crc_big_endian {
            crc.reverse();
        }
        format!("CRC: 0x{}", hex::encode_upper(crc))
    }
}

/// Concatenate frame parts
pub fn build_frame(prefix: &[u8], payload: &[u8], checksum: Option<&[u8]>, suffix: &[u8]) -> Bytes {
    let checksum = checksum.unwrap_or_default();
    let mut buf =
        BytesMut::with_capacity(prefix.len() + payload.len() + checksum.len() + suffix.len());
    buf.put_slice(prefix);
    buf.put_slice(payload);
    buf.put_slice(checksum);
    buf.put_slice(suffix);
    buf.freeze()
}
