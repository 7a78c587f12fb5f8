//! Packed major/minor version fields.

use std::fmt;

/// A VHD version: high 16 bits major, low 16 bits minor.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DiskVersion(u32);

impl DiskVersion {
    /// Builds a version from its major and minor halves.
    pub const fn new(major: u16, minor: u16) -> Self {
        Self(((major as u32) << 16) | minor as u32)
    }

    /// Wraps an already packed version value.
    pub const fn from_packed(packed: u32) -> Self {
        Self(packed)
    }

    /// Builds a version from whichever form is available.
    ///
    /// The `(major, minor)` pair wins when both are supplied; with neither
    /// the result is version 0.0.
    pub fn decode(pair: Option<(u16, u16)>, packed: Option<u32>) -> Self {
        match (pair, packed) {
            (Some((major, minor)), _) => Self::new(major, minor),
            (None, Some(packed)) => Self::from_packed(packed),
            (None, None) => Self::default(),
        }
    }

    #[inline]
    pub const fn packed(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    #[inline]
    pub const fn minor(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Debug for DiskVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiskVersion({}, {})", self.major(), self.minor())
    }
}

impl fmt::Display for DiskVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

impl From<u32> for DiskVersion {
    fn from(packed: u32) -> Self {
        Self::from_packed(packed)
    }
}
