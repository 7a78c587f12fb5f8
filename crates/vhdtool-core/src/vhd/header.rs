//! VHD dynamic header and parent locator decoding.
//!
//! Dynamic and differencing disks carry a 1024-byte header after the footer
//! copy. Differencing disks name their parent there and list up to eight
//! platform-specific locators that the engine uses to find it.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use super::version::DiskVersion;
use super::{
    be_u32, be_u64, checksum, fourcc, timestamp_to_datetime, BLOCK_SHIFT, HEADER_COOKIE,
    HEADER_SIZE,
};
use crate::error::{Error, Result};

const CHECKSUM_OFFSET: usize = 36;
const PARENT_NAME_OFFSET: usize = 64;
const PARENT_NAME_LEN: usize = 512;
const LOCATOR_OFFSET: usize = 576;
const LOCATOR_SIZE: usize = 24;

/// Number of locator slots in the header.
pub const LOCATOR_SLOTS: usize = 8;

/// Platform code of a parent locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformCode {
    /// Unused slot.
    None,
    /// Deprecated Windows relative path.
    Wi2r,
    /// Deprecated Windows absolute path.
    Wi2k,
    /// Windows relative path, UTF-16.
    W2ru,
    /// Windows absolute path, UTF-16.
    W2ku,
    /// MacOS alias stored as a blob.
    Mac,
    /// File URL, UTF-8 (RFC 2396).
    MacX,
    /// A code this decoder does not know, kept verbatim.
    Unknown(u32),
}

impl PlatformCode {
    pub const NONE: u32 = 0x0;
    pub const WI2R: u32 = 0x5769_3272;
    pub const WI2K: u32 = 0x5769_326B;
    pub const W2RU: u32 = 0x5732_7275;
    pub const W2KU: u32 = 0x5732_6B75;
    pub const MAC: u32 = 0x4D61_6320;
    pub const MACX: u32 = 0x4D61_6358;

    pub fn from_code(code: u32) -> Self {
        match code {
            Self::NONE => PlatformCode::None,
            Self::WI2R => PlatformCode::Wi2r,
            Self::WI2K => PlatformCode::Wi2k,
            Self::W2RU => PlatformCode::W2ru,
            Self::W2KU => PlatformCode::W2ku,
            Self::MAC => PlatformCode::Mac,
            Self::MACX => PlatformCode::MacX,
            other => PlatformCode::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            PlatformCode::None => Self::NONE,
            PlatformCode::Wi2r => Self::WI2R,
            PlatformCode::Wi2k => Self::WI2K,
            PlatformCode::W2ru => Self::W2RU,
            PlatformCode::W2ku => Self::W2KU,
            PlatformCode::Mac => Self::MAC,
            PlatformCode::MacX => Self::MACX,
            PlatformCode::Unknown(code) => code,
        }
    }

    pub fn is_deprecated(self) -> bool {
        matches!(self, PlatformCode::Wi2r | PlatformCode::Wi2k)
    }
}

impl fmt::Display for PlatformCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&fourcc(self.code()))
    }
}

/// One populated parent locator slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatorEntry {
    pub platform: PlatformCode,
    pub data_space: u32,
    pub data_len: u32,
    pub reserved: u32,
    pub data_offset: u64,
}

impl LocatorEntry {
    fn decode(raw: &[u8]) -> Self {
        Self {
            platform: PlatformCode::from_code(be_u32(&raw[0..4])),
            data_space: be_u32(&raw[4..8]),
            data_len: be_u32(&raw[8..12]),
            reserved: be_u32(&raw[12..16]),
            data_offset: be_u64(&raw[16..24]),
        }
    }
}

/// The parent display name, or a marker that it could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentName {
    Name(String),
    Unavailable,
}

impl ParentName {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParentName::Name(name) => Some(name),
            ParentName::Unavailable => None,
        }
    }
}

impl fmt::Display for ParentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentName::Name(name) => f.write_str(name),
            ParentName::Unavailable => f.write_str("Cannot read parent name"),
        }
    }
}

/// Decoded VHD dynamic header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRecord {
    pub cookie: [u8; 8],
    pub data_offset: u64,
    /// Absolute offset of the block allocation table.
    pub table_offset: u64,
    pub header_version: DiskVersion,
    pub max_table_entries: u32,
    pub block_size: u32,
    pub checksum: u32,
    pub parent_unique_id: Uuid,
    pub parent_timestamp: u32,
    pub reserved: u32,
    pub parent_name: ParentName,
    /// Populated locator slots in table order.
    pub locators: Vec<LocatorEntry>,
    /// Checksum recomputed over the raw bytes at decode time.
    pub computed_checksum: u32,
}

impl HeaderRecord {
    pub fn cookie_valid(&self) -> bool {
        self.cookie == HEADER_COOKIE
    }

    pub fn checksum_valid(&self) -> bool {
        self.checksum == self.computed_checksum
    }

    pub fn parent_created_at(&self) -> Option<DateTime<Utc>> {
        timestamp_to_datetime(self.parent_timestamp)
    }

    /// Largest virtual size the allocation table can address, in MiB,
    /// assuming the default 2 MiB block size.
    pub fn max_virtual_size_mib(&self) -> u64 {
        (self.max_table_entries as u64) << (BLOCK_SHIFT - 20)
    }
}

/// Decodes a raw 1024-byte dynamic header.
///
/// The parent name is obtained from `resolve_parent_name`, which receives the
/// raw 512-byte on-disk name field. If it fails, the name is recorded as
/// [`ParentName::Unavailable`] and the rest of the header is still decoded.
pub fn decode_header<F>(raw: &[u8; HEADER_SIZE], resolve_parent_name: F) -> HeaderRecord
where
    F: FnOnce(&[u8]) -> Result<String>,
{
    let mut cookie = [0u8; 8];
    cookie.copy_from_slice(&raw[0..8]);
    let mut parent_uuid = [0u8; 16];
    parent_uuid.copy_from_slice(&raw[40..56]);

    let name_field = &raw[PARENT_NAME_OFFSET..PARENT_NAME_OFFSET + PARENT_NAME_LEN];
    let parent_name = match resolve_parent_name(name_field) {
        Ok(name) => ParentName::Name(name),
        Err(e) => {
            warn!(error = %e, "parent name could not be resolved");
            ParentName::Unavailable
        }
    };

    let locators = raw[LOCATOR_OFFSET..LOCATOR_OFFSET + LOCATOR_SLOTS * LOCATOR_SIZE]
        .chunks_exact(LOCATOR_SIZE)
        .map(LocatorEntry::decode)
        .filter(|loc| loc.platform != PlatformCode::None)
        .collect();

    HeaderRecord {
        cookie,
        data_offset: be_u64(&raw[8..16]),
        table_offset: be_u64(&raw[16..24]),
        header_version: DiskVersion::from_packed(be_u32(&raw[24..28])),
        max_table_entries: be_u32(&raw[28..32]),
        block_size: be_u32(&raw[32..36]),
        checksum: be_u32(&raw[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4]),
        parent_unique_id: Uuid::from_bytes(parent_uuid),
        parent_timestamp: be_u32(&raw[56..60]),
        reserved: be_u32(&raw[60..64]),
        parent_name,
        locators,
        computed_checksum: checksum(raw, CHECKSUM_OFFSET),
    }
}

/// Decodes the on-disk parent name field (UTF-16BE, NUL terminated).
pub fn decode_parent_name_utf16(raw: &[u8]) -> Result<String> {
    if raw.len() % 2 != 0 {
        return Err(Error::decode("parent name field has odd length"));
    }
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16(&units).map_err(|e| Error::decode(format!("parent name: {}", e)))
}
