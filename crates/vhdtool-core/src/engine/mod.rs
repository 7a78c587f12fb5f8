//! The external VHD engine.
//!
//! Everything that understands a container's allocation table, bitmaps or
//! parent chain lives behind [`VhdEngine`] and [`VhdHandle`]. This crate only
//! stages data for the engine and decodes what it hands back. The production
//! implementation is [`libvhd::LibvhdEngine`], a runtime binding to the native
//! `libvhd` shared library.

pub mod errno;
pub mod libvhd;
pub mod options;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bitflags::bitflags;

use crate::buffer::AlignedBuffer;
use crate::error::{Error, Result};
use crate::vhd::{decode_footer, decode_header, FooterRecord, HeaderRecord, FOOTER_SIZE, HEADER_SIZE};

pub use crate::vhd::DiskType;
pub use options::{CheckOptions, CoalesceTarget};

bitflags! {
    /// Flags accepted by [`VhdEngine::open`].
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0x0000_0001;
        const RDWR = 0x0000_0002;
        const FAST = 0x0000_0004;
        const STRICT = 0x0000_0008;
        const IGNORE_DISABLED = 0x0000_0010;
    }
}

bitflags! {
    /// Flags accepted by [`VhdEngine::create`].
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct CreateFlags: u32 {
        /// The parent of a differencing disk is a raw image.
        const PARENT_RAW = 0x0000_0001;
    }
}

impl OpenFlags {
    /// Names accepted by [`OpenFlags::from_str`], in bit order.
    pub const NAMES: [(&'static str, OpenFlags); 5] = [
        ("rdonly", OpenFlags::RDONLY),
        ("rdwr", OpenFlags::RDWR),
        ("fast", OpenFlags::FAST),
        ("strict", OpenFlags::STRICT),
        ("ignore_disabled", OpenFlags::IGNORE_DISABLED),
    ];

    fn valid_names() -> String {
        Self::NAMES
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags::RDONLY
    }
}

impl FromStr for OpenFlags {
    type Err = Error;

    /// Parses a comma separated flag list such as `"rdonly,fast"`.
    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(str::trim)
            .try_fold(OpenFlags::empty(), |flags, name| {
                Self::NAMES
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|&(_, flag)| flags | flag)
                    .ok_or_else(|| Error::InvalidOpenFlag {
                        name: name.to_string(),
                        valid: Self::valid_names(),
                    })
            })
    }
}

impl fmt::Display for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        f.write_str(&names.join(","))
    }
}

/// Entry points of the external engine that do not need an open container.
pub trait VhdEngine {
    type Handle: VhdHandle;

    /// Creates an empty container of `size_bytes` logical bytes.
    ///
    /// `size_bytes` must be a multiple of the sector size.
    fn create(
        &self,
        path: &Path,
        size_bytes: u64,
        disk_type: DiskType,
        flags: CreateFlags,
    ) -> Result<()>;

    /// Opens an existing container.
    fn open(&self, path: &Path, flags: OpenFlags) -> Result<Self::Handle>;

    /// Runs the engine's consistency check.
    fn check(&self, path: &Path, options: &CheckOptions) -> Result<()>;

    /// Merges a container into the target named by `target`.
    fn coalesce(&self, path: &Path, target: &CoalesceTarget, sparse: bool) -> Result<()>;
}

/// An open container.
pub trait VhdHandle {
    /// Reads `num_sectors` sectors starting at `start_sector` into `buf`.
    fn read(&mut self, buf: &mut AlignedBuffer, start_sector: u64, num_sectors: u32) -> Result<()>;

    /// Writes the first `num_sectors` sectors of `buf` at `start_sector`.
    fn write(&mut self, buf: &AlignedBuffer, start_sector: u64, num_sectors: u32) -> Result<()>;

    /// The footer in its on-disk (big-endian) layout.
    fn footer_bytes(&self) -> [u8; FOOTER_SIZE];

    /// The dynamic header in its on-disk layout. Meaningless for fixed disks.
    fn header_bytes(&self) -> [u8; HEADER_SIZE];

    /// Resolves the parent display name of a differencing disk.
    fn parent_name(&self) -> Result<String>;

    /// Number of generations in the parent chain, this container included.
    fn chain_depth(&self) -> Result<u32>;

    /// Closes the container.
    fn close(self) -> Result<()>
    where
        Self: Sized;

    /// Decoded footer.
    fn footer(&self) -> FooterRecord {
        decode_footer(&self.footer_bytes())
    }

    /// Decoded dynamic header, with the parent name from [`parent_name`](Self::parent_name).
    fn header(&self) -> HeaderRecord {
        decode_header(&self.header_bytes(), |_| self.parent_name())
    }
}
