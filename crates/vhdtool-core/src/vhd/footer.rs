//! VHD footer decoding.
//!
//! The footer is the 512-byte structure at the end of every VHD file (and
//! mirrored at offset 0 for dynamic disks).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::version::DiskVersion;
use super::{be_u32, be_u64, checksum, fourcc, timestamp_to_datetime, FOOTER_COOKIE, FOOTER_SIZE};
use crate::error::{Error, Result};

const CHECKSUM_OFFSET: usize = 64;

/// Container disk types understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum DiskType {
    Fixed = 2,
    #[default]
    Dynamic = 3,
    Differencing = 4,
}

impl DiskType {
    /// All disk types with their names, in engine code order.
    pub const ALL: [(&'static str, DiskType); 3] = [
        ("fixed", DiskType::Fixed),
        ("dynamic", DiskType::Dynamic),
        ("differencing", DiskType::Differencing),
    ];

    /// Maps an on-disk type code to a disk type.
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL
            .iter()
            .map(|&(_, t)| t)
            .find(|t| t.code() == code)
    }

    #[inline]
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            DiskType::Fixed => "fixed",
            DiskType::Dynamic => "dynamic",
            DiskType::Differencing => "differencing",
        }
    }

    /// True for types that carry a dynamic header.
    pub fn has_header(self) -> bool {
        !matches!(self, DiskType::Fixed)
    }
}

impl fmt::Display for DiskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DiskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(s))
            .map(|&(_, t)| t)
            .ok_or_else(|| Error::InvalidDiskType {
                name: s.to_string(),
                valid: Self::ALL
                    .iter()
                    .map(|(name, _)| *name)
                    .collect::<Vec<_>>()
                    .join(","),
            })
    }
}

/// Legacy CHS geometry packed into the footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors_per_track: u8,
}

impl Geometry {
    pub fn from_packed(packed: u32) -> Self {
        Self {
            cylinders: (packed >> 16) as u16,
            heads: (packed >> 8) as u8,
            sectors_per_track: packed as u8,
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.cylinders, self.heads, self.sectors_per_track
        )
    }
}

/// Decoded VHD footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FooterRecord {
    pub cookie: [u8; 8],
    pub features: u32,
    pub format_version: DiskVersion,
    /// Absolute offset of the dynamic header, `u64::MAX` for fixed disks.
    pub data_offset: u64,
    /// Seconds since 2000-01-01T00:00:00Z.
    pub timestamp: u32,
    pub creator_application: [u8; 4],
    pub creator_version: DiskVersion,
    pub creator_os: u32,
    pub original_size: u64,
    pub current_size: u64,
    pub geometry: Geometry,
    /// Raw disk type code, see [`FooterRecord::disk_type`].
    pub disk_type: u32,
    pub checksum: u32,
    pub unique_id: Uuid,
    pub saved_state: u8,
    pub hidden: u8,
    /// Checksum recomputed over the raw bytes at decode time.
    pub computed_checksum: u32,
}

impl FooterRecord {
    /// The disk type, if the code is one the engine knows.
    pub fn disk_type(&self) -> Option<DiskType> {
        DiskType::from_code(self.disk_type)
    }

    pub fn cookie_valid(&self) -> bool {
        self.cookie == FOOTER_COOKIE
    }

    pub fn checksum_valid(&self) -> bool {
        self.checksum == self.computed_checksum
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        timestamp_to_datetime(self.timestamp)
    }

    /// Creator application tag, e.g. `"tap "` or `"vpc "`.
    pub fn creator_application(&self) -> String {
        fourcc(u32::from_be_bytes(self.creator_application))
    }

    /// Creator host OS tag, e.g. `"Wi2k"`.
    pub fn creator_os(&self) -> String {
        fourcc(self.creator_os)
    }

    /// Number of whole sectors in the virtual disk.
    pub fn total_sectors(&self) -> u64 {
        self.current_size / super::SECTOR_SIZE
    }
}

/// Decodes a raw 512-byte footer.
pub fn decode_footer(raw: &[u8; FOOTER_SIZE]) -> FooterRecord {
    let mut cookie = [0u8; 8];
    cookie.copy_from_slice(&raw[0..8]);
    let mut creator_application = [0u8; 4];
    creator_application.copy_from_slice(&raw[28..32]);
    let mut uuid = [0u8; 16];
    uuid.copy_from_slice(&raw[68..84]);

    FooterRecord {
        cookie,
        features: be_u32(&raw[8..12]),
        format_version: DiskVersion::from_packed(be_u32(&raw[12..16])),
        data_offset: be_u64(&raw[16..24]),
        timestamp: be_u32(&raw[24..28]),
        creator_application,
        creator_version: DiskVersion::from_packed(be_u32(&raw[32..36])),
        creator_os: be_u32(&raw[36..40]),
        original_size: be_u64(&raw[40..48]),
        current_size: be_u64(&raw[48..56]),
        geometry: Geometry::from_packed(be_u32(&raw[56..60])),
        disk_type: be_u32(&raw[60..64]),
        checksum: be_u32(&raw[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4]),
        unique_id: Uuid::from_bytes(uuid),
        saved_state: raw[84],
        hidden: raw[85],
        computed_checksum: checksum(raw, CHECKSUM_OFFSET),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_type_codes() {
        assert_eq!(DiskType::from_code(2), Some(DiskType::Fixed));
        assert_eq!(DiskType::from_code(3), Some(DiskType::Dynamic));
        assert_eq!(DiskType::from_code(4), Some(DiskType::Differencing));
        assert_eq!(DiskType::from_code(0), None);
        assert_eq!(DiskType::Dynamic.code(), 3);
    }

    #[test]
    fn test_disk_type_parse() {
        assert_eq!("dynamic".parse::<DiskType>().unwrap(), DiskType::Dynamic);
        assert_eq!("Fixed".parse::<DiskType>().unwrap(), DiskType::Fixed);
        let err = "sparse".parse::<DiskType>().unwrap_err();
        assert!(err.to_string().contains("fixed,dynamic,differencing"));
    }

    #[test]
    fn test_geometry_unpack() {
        let g = Geometry::from_packed(0x0410_1011);
        assert_eq!(g.cylinders, 0x0410);
        assert_eq!(g.heads, 0x10);
        assert_eq!(g.sectors_per_track, 0x11);
    }

    #[test]
    fn test_decode_zeroed_footer_is_total() {
        let footer = decode_footer(&[0u8; FOOTER_SIZE]);
        assert!(!footer.cookie_valid());
        assert_eq!(footer.disk_type(), None);
        assert!(footer.unique_id.is_nil());
        assert!(!footer.checksum_valid());
    }
}
