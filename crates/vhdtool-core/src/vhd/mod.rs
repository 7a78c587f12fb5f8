//! VHD on-disk structure decoding.
//!
//! This module turns the fixed-layout, big-endian VHD footer, dynamic header
//! and parent locator table into semantic records. Decoding is total: every
//! field is a fixed-width read, so malformed input yields garbage values
//! rather than errors. Validity is judged by the caller or the engine.

pub mod footer;
pub mod header;
pub mod version;

pub use footer::{decode_footer, DiskType, FooterRecord, Geometry};
pub use header::{
    decode_header, decode_parent_name_utf16, HeaderRecord, LocatorEntry, ParentName,
    PlatformCode, LOCATOR_SLOTS,
};
pub use version::DiskVersion;

use chrono::{DateTime, Utc};

/// Size of a sector in bytes.
pub const SECTOR_SIZE: u64 = 512;

/// Size of the footer structure in bytes.
pub const FOOTER_SIZE: usize = 512;

/// Size of the dynamic disk header structure in bytes.
pub const HEADER_SIZE: usize = 1024;

/// Footer cookie.
pub const FOOTER_COOKIE: [u8; 8] = *b"conectix";

/// Dynamic header cookie.
pub const HEADER_COOKIE: [u8; 8] = *b"cxsparse";

/// log2 of the default block size (2 MiB).
pub const BLOCK_SHIFT: u32 = 21;

/// Seconds between the Unix epoch and the VHD epoch (2000-01-01T00:00:00Z).
pub const VHD_EPOCH_OFFSET: i64 = 946_684_800;

#[inline]
pub(crate) fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline]
pub(crate) fn be_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// One's complement of the byte sum, skipping the 4-byte checksum field at
/// `checksum_offset`.
pub(crate) fn checksum(raw: &[u8], checksum_offset: usize) -> u32 {
    let skip = checksum_offset..checksum_offset + 4;
    let sum = raw
        .iter()
        .enumerate()
        .filter(|(i, _)| !skip.contains(i))
        .fold(0u32, |sum, (_, &b)| sum.wrapping_add(b as u32));
    !sum
}

/// Converts a VHD timestamp into a UTC date.
pub fn timestamp_to_datetime(timestamp: u32) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(VHD_EPOCH_OFFSET + timestamp as i64, 0)
}

/// Renders a big-endian four-character code such as `"Wi2k"`.
///
/// Non-printable bytes are replaced with `.`.
pub fn fourcc(code: u32) -> String {
    code.to_be_bytes()
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        })
        .collect()
}
