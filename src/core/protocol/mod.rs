//! Checksums and outgoing frame assembly

pub mod checksum;
pub mod framing;

pub use checksum::{calculate as calc_checksum, ChecksumAlgorithm, ChecksumContext, CrcModel};
pub use framing::{build_frame, Frame, FrameParameters};
