//! Checksum calculation algorithms
//!
//! Every algorithm has a fixed integer id so that frames built elsewhere can
//! select the same checksum. CRC variants are described by their Rocksoft
//! parameters; the additive checksums are computed directly.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Checksum algorithm identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum ChecksumAlgorithm {
    /// CRC-8 (poly 0x07)
    Crc8 = 0,
    /// CRC-8/ITU (poly 0x07, xorout 0x55)
    Crc8Itu = 1,
    /// CRC-8/ROHC (poly 0x07, init 0xFF, reflected)
    Crc8Rohc = 2,
    /// CRC-8/MAXIM (poly 0x31, reflected)
    Crc8Maxim = 3,
    /// CRC-16/IBM, also known as CRC-16/ARC
    Crc16Ibm = 4,
    /// CRC-16/MAXIM
    Crc16Maxim = 5,
    /// CRC-16/USB
    Crc16Usb = 6,
    /// CRC-16/MODBUS
    Crc16Modbus = 7,
    /// CRC-16/CCITT (Kermit variant: init 0, reflected)
    Crc16Ccitt = 8,
    /// CRC-16/CCITT-FALSE
    Crc16CcittFalse = 9,
    /// CRC-16/X25
    Crc16X25 = 10,
    /// CRC-16/XMODEM
    Crc16Xmodem = 11,
    /// CRC-16/DNP
    Crc16Dnp = 12,
    /// CRC-32 (IEEE 802.3)
    Crc32 = 13,
    /// CRC-32/MPEG-2
    Crc32Mpeg2 = 14,
    /// Sum of all bytes mod 2^8
    Sum8 = 15,
    /// Sum of all bytes mod 2^16
    Sum16 = 16,
    /// Sum of all bytes mod 2^32
    Sum32 = 17,
    /// XOR of all bytes
    Xor8 = 18,
    /// Longitudinal Redundancy Check (two's complement of Sum-8)
    Lrc = 19,
}

/// Rocksoft CRC model parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcModel {
    /// Register width in bits (8, 16 or 32)
    pub width: u8,
    /// Generator polynomial, normal (MSB-first) form
    pub poly: u32,
    /// Initial register value
    pub init: u32,
    /// Reflect each input byte
    pub refin: bool,
    /// Reflect the final register
    pub refout: bool,
    /// Value XORed into the final register
    pub xorout: u32,
}

impl CrcModel {
    const fn new(width: u8, poly: u32, init: u32, refin: bool, refout: bool, xorout: u32) -> Self {
        Self {
            width,
            poly,
            init,
            refin,
            refout,
            xorout,
        }
    }

    fn mask(&self) -> u32 {
        if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }

    /// Run the model over `data`
    pub fn compute(&self, data: &[u8]) -> u32 {
        let width = u32::from(self.width);
        let mask = self.mask();
        let top = 1u32 << (width - 1);
        let mut crc = self.init & mask;

        for &byte in data {
            let byte = if self.refin { byte.reverse_bits() } else { byte };
            crc ^= u32::from(byte) << (width - 8);
            for _ in 0..8 {
                crc = if crc & top != 0 {
                    ((crc << 1) ^ self.poly) & mask
                } else {
                    (crc << 1) & mask
                };
            }
        }

        if self.refout {
            crc = crc.reverse_bits() >> (32 - width);
        }

        (crc ^ self.xorout) & mask
    }
}

impl ChecksumAlgorithm {
    /// Get all algorithms in id order
    pub fn all() -> &'static [ChecksumAlgorithm] {
        use ChecksumAlgorithm::*;
        &[
            Crc8, Crc8Itu, Crc8Rohc, Crc8Maxim, Crc16Ibm, Crc16Maxim, Crc16Usb, Crc16Modbus,
            Crc16Ccitt, Crc16CcittFalse, Crc16X25, Crc16Xmodem, Crc16Dnp, Crc32, Crc32Mpeg2,
            Sum8, Sum16, Sum32, Xor8, Lrc,
        ]
    }

    /// Look up an algorithm by its persisted id
    pub fn from_id(id: u32) -> Option<Self> {
        Self::all().get(usize::try_from(id).ok()?).copied()
    }

    /// Persisted integer id
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            Self::Crc8 => "CRC-8",
            Self::Crc8Itu => "CRC-8/ITU",
            Self::Crc8Rohc => "CRC-8/ROHC",
            Self::Crc8Maxim => "CRC-8/MAXIM",
            Self::Crc16Ibm => "CRC-16/IBM",
            Self::Crc16Maxim => "CRC-16/MAXIM",
            Self::Crc16Usb => "CRC-16/USB",
            Self::Crc16Modbus => "CRC-16/MODBUS",
            Self::Crc16Ccitt => "CRC-16/CCITT",
            Self::Crc16CcittFalse => "CRC-16/CCITT-FALSE",
            Self::Crc16X25 => "CRC-16/X25",
            Self::Crc16Xmodem => "CRC-16/XMODEM",
            Self::Crc16Dnp => "CRC-16/DNP",
            Self::Crc32 => "CRC-32",
            Self::Crc32Mpeg2 => "CRC-32/MPEG-2",
            Self::Sum8 => "Sum-8",
            Self::Sum16 => "Sum-16",
            Self::Sum32 => "Sum-32",
            Self::Xor8 => "XOR-8",
            Self::Lrc => "LRC",
        }
    }

    /// Find an algorithm by display name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|a| a.name().eq_ignore_ascii_case(name))
    }

    /// Result width in bits
    pub fn width(self) -> u8 {
        match self.model() {
            Some(model) => model.width,
            None => match self {
                Self::Sum16 => 16,
                Self::Sum32 => 32,
                _ => 8,
            },
        }
    }

    /// Result width in bytes
    pub fn size(self) -> usize {
        usize::from(self.width() / 8)
    }

    /// CRC parameters, `None` for the additive checksums
    pub fn model(self) -> Option<CrcModel> {
        let model = match self {
            Self::Crc8 => CrcModel::new(8, 0x07, 0x00, false, false, 0x00),
            Self::Crc8Itu => CrcModel::new(8, 0x07, 0x00, false, false, 0x55),
            Self::Crc8Rohc => CrcModel::new(8, 0x07, 0xFF, true, true, 0x00),
            Self::Crc8Maxim => CrcModel::new(8, 0x31, 0x00, true, true, 0x00),
            Self::Crc16Ibm => CrcModel::new(16, 0x8005, 0x0000, true, true, 0x0000),
            Self::Crc16Maxim => CrcModel::new(16, 0x8005, 0x0000, true, true, 0xFFFF),
            Self::Crc16Usb => CrcModel::new(16, 0x8005, 0xFFFF, true, true, 0xFFFF),
            Self::Crc16Modbus => CrcModel::new(16, 0x8005, 0xFFFF, true, true, 0x0000),
            Self::Crc16Ccitt => CrcModel::new(16, 0x1021, 0x0000, true, true, 0x0000),
            Self::Crc16CcittFalse => CrcModel::new(16, 0x1021, 0xFFFF, false, false, 0x0000),
            Self::Crc16X25 => CrcModel::new(16, 0x1021, 0xFFFF, true, true, 0xFFFF),
            Self::Crc16Xmodem => CrcModel::new(16, 0x1021, 0x0000, false, false, 0x0000),
            Self::Crc16Dnp => CrcModel::new(16, 0x3D65, 0x0000, true, true, 0xFFFF),
            Self::Crc32 => CrcModel::new(32, 0x04C1_1DB7, 0xFFFF_FFFF, true, true, 0xFFFF_FFFF),
            Self::Crc32Mpeg2 => CrcModel::new(32, 0x04C1_1DB7, 0xFFFF_FFFF, false, false, 0),
            Self::Sum8 | Self::Sum16 | Self::Sum32 | Self::Xor8 | Self::Lrc => return None,
        };
        Some(model)
    }

    /// Checksum value of `data`, right-aligned in a `u32`
    pub fn value(self, data: &[u8]) -> u32 {
        if let Some(model) = self.model() {
            return model.compute(data);
        }

        match self {
            Self::Sum8 => u32::from(sum8_checksum(data)),
            Self::Sum16 => u32::from(sum16_checksum(data)),
            Self::Sum32 => sum32_checksum(data),
            Self::Xor8 => u32::from(xor_checksum(data)),
            _ => u32::from(lrc_checksum(data)),
        }
    }
}

/// Inputs of one checksum calculation
#[derive(Debug, Clone, Copy)]
pub struct ChecksumContext<'a> {
    /// Persisted algorithm id (see [`ChecksumAlgorithm::from_id`])
    pub algorithm: u32,
    /// First byte of the covered range
    pub start_index: usize,
    /// Last byte of the covered range (inclusive)
    pub end_index: usize,
    /// Serialize the result most significant byte first
    pub big_endian: bool,
    /// Buffer the range is taken from
    pub data: &'a [u8],
}

impl<'a> ChecksumContext<'a> {
    /// Context covering the whole buffer
    pub fn new(algorithm: ChecksumAlgorithm, data: &'a [u8]) -> Self {
        Self {
            algorithm: algorithm.id(),
            start_index: 0,
            end_index: usize::MAX,
            big_endian: true,
            data,
        }
    }

    /// Restrict the covered range
    #[must_use]
    pub fn range(mut self, start_index: usize, end_index: usize) -> Self {
        self.start_index = start_index;
        self.end_index = end_index;
        self
    }

    /// Set the serialization byte order
    #[must_use]
    pub fn big_endian(mut self, big_endian: bool) -> Self {
        self.big_endian = big_endian;
        self
    }

    /// Effective byte range after clamping.
    ///
    /// The end index clamps to the last byte; a start index past the end
    /// (or past the data) yields the empty range.
    pub fn effective_range(&self) -> std::ops::Range<usize> {
        if self.data.is_empty() {
            return 0..0;
        }
        let end = self.end_index.min(self.data.len() - 1);
        if self.start_index > end {
            return 0..0;
        }
        self.start_index..end + 1
    }

    /// The covered slice
    pub fn slice(&self) -> &'a [u8] {
        &self.data[self.effective_range()]
    }
}

/// Calculate the checksum described by `ctx`.
///
/// Returns the checksum serialized to exactly the algorithm's width. An
/// unknown algorithm id yields an empty result.
pub fn calculate(ctx: &ChecksumContext<'_>) -> Vec<u8> {
    let Some(algorithm) = ChecksumAlgorithm::from_id(ctx.algorithm) else {
        warn!(id = ctx.algorithm, "unsupported checksum algorithm");
        return Vec::new();
    };

    let value = algorithm.value(ctx.slice());
    serialize(value, algorithm.size(), ctx.big_endian)
}

fn serialize(value: u32, size: usize, big_endian: bool) -> Vec<u8> {
    let be = value.to_be_bytes();
    let mut bytes = be[be.len() - size..].to_vec();
    if !big_endian {
        bytes.reverse();
    }
    bytes
}

/// Verify a checksum over the whole buffer
pub fn verify(data: &[u8], checksum: &[u8], algorithm: ChecksumAlgorithm, big_endian: bool) -> bool {
    let ctx = ChecksumContext::new(algorithm, data).big_endian(big_endian);
    calculate(&ctx) == checksum
}

/// XOR checksum - XOR of all bytes
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// LRC (Longitudinal Redundancy Check)
/// Sum of all bytes, then two's complement
pub fn lrc_checksum(data: &[u8]) -> u8 {
    sum8_checksum(data).wrapping_neg()
}

/// Simple 8-bit sum
pub fn sum8_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Simple 16-bit sum
pub fn sum16_checksum(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// Simple 32-bit sum
pub fn sum32_checksum(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |acc, &b| acc.wrapping_add(u32::from(b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    #[test]
    fn test_check_values() {
        let expected: &[(ChecksumAlgorithm, u32)] = &[
            (ChecksumAlgorithm::Crc8, 0xF4),
            (ChecksumAlgorithm::Crc8Itu, 0xA1),
            (ChecksumAlgorithm::Crc8Rohc, 0xD0),
            (ChecksumAlgorithm::Crc8Maxim, 0xA1),
            (ChecksumAlgorithm::Crc16Ibm, 0xBB3D),
            (ChecksumAlgorithm::Crc16Maxim, 0x44C2),
            (ChecksumAlgorithm::Crc16Usb, 0xB4C8),
            (ChecksumAlgorithm::Crc16Modbus, 0x4B37),
            (ChecksumAlgorithm::Crc16Ccitt, 0x2189),
            (ChecksumAlgorithm::Crc16CcittFalse, 0x29B1),
            (ChecksumAlgorithm::Crc16X25, 0x906E),
            (ChecksumAlgorithm::Crc16Xmodem, 0x31C3),
            (ChecksumAlgorithm::Crc16Dnp, 0xEA82),
            (ChecksumAlgorithm::Crc32, 0xCBF4_3926),
            (ChecksumAlgorithm::Crc32Mpeg2, 0x0376_E6E7),
        ];
        for &(algorithm, value) in expected {
            assert_eq!(algorithm.value(CHECK), value, "{}", algorithm.name());
        }
    }

    #[test]
    fn test_additive() {
        assert_eq!(xor_checksum(&[0x01, 0x02, 0x03]), 0x00);
        assert_eq!(xor_checksum(&[0xFF, 0x00]), 0xFF);
        assert_eq!(sum8_checksum(&[0xFF, 0x02]), 0x01);
        assert_eq!(sum16_checksum(&[0xFF, 0x02]), 0x0101);
        assert_eq!(lrc_checksum(&[0x01, 0x02]), 0xFD);
    }

    #[test]
    fn test_ids_round_trip() {
        for &algorithm in ChecksumAlgorithm::all() {
            assert_eq!(ChecksumAlgorithm::from_id(algorithm.id()), Some(algorithm));
        }
        assert_eq!(ChecksumAlgorithm::from_id(20), None);
        assert_eq!(ChecksumAlgorithm::from_name("crc-16/modbus"), Some(ChecksumAlgorithm::Crc16Modbus));
    }

    #[test]
    fn test_byte_order() {
        let be = calculate(&ChecksumContext::new(ChecksumAlgorithm::Crc16Modbus, CHECK));
        let le = calculate(&ChecksumContext::new(ChecksumAlgorithm::Crc16Modbus, CHECK).big_endian(false));
        assert_eq!(be, vec![0x4B, 0x37]);
        assert_eq!(le, vec![0x37, 0x4B]);
    }

    #[test]
    fn test_width_matches_output() {
        for &algorithm in ChecksumAlgorithm::all() {
            let out = calculate(&ChecksumContext::new(algorithm, CHECK));
            assert_eq!(out.len(), algorithm.size(), "{}", algorithm.name());
        }
    }

    #[test]
    fn test_unknown_algorithm_is_empty() {
        let mut ctx = ChecksumContext::new(ChecksumAlgorithm::Crc32, CHECK);
        ctx.algorithm = 99;
        assert!(calculate(&ctx).is_empty());
    }

    #[test]
    fn test_range_clamping() {
        let data = [0x01, 0x02, 0x03];
        let full = ChecksumContext::new(ChecksumAlgorithm::Sum8, &data);
        assert_eq!(full.effective_range(), 0..3);

        let clamped = full.range(1, 100);
        assert_eq!(clamped.effective_range(), 1..3);
        assert_eq!(calculate(&clamped), vec![0x05]);

        let inverted = full.range(2, 1);
        assert_eq!(inverted.effective_range(), 0..0);
        assert_eq!(calculate(&inverted), vec![0x00]);

        let past_end = full.range(7, 9);
        assert!(past_end.slice().is_empty());

        let empty = ChecksumContext::new(ChecksumAlgorithm::Crc16Modbus, &[]);
        assert_eq!(calculate(&empty), vec![0xFF, 0xFF]);
    }

    #[test]
    fn test_partial_range() {
        // CRC over "234" inside "12345"
        let ctx = ChecksumContext::new(ChecksumAlgorithm::Crc8, b"12345").range(1, 3);
        assert_eq!(calculate(&ctx), vec![ChecksumAlgorithm::Crc8.value(b"234") as u8]);
    }
}
