//! Read-only inspection of a container's metadata.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::engine::{OpenFlags, VhdEngine, VhdHandle};
use crate::error::{Error, Result};
use crate::vhd::{FooterRecord, HeaderRecord};

/// Summary information about a container.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub path: PathBuf,
    pub footer: FooterRecord,
    /// Present for dynamic and differencing disks.
    pub header: Option<HeaderRecord>,
    /// Generations in the parent chain, this container included.
    pub chain_depth: u32,
}

impl ContainerInfo {
    /// Logical size in bytes.
    pub fn virtual_size(&self) -> u64 {
        self.footer.current_size
    }

    pub fn is_differencing(&self) -> bool {
        self.footer.disk_type() == Some(crate::vhd::DiskType::Differencing)
    }
}

/// Get information about a container without modifying it.
///
/// The container is opened read-only in fast mode. A parent name the engine
/// cannot resolve does not fail the call; it shows up as
/// [`ParentName::Unavailable`](crate::vhd::ParentName::Unavailable).
pub fn inspect<E: VhdEngine>(engine: &E, path: &Path) -> Result<ContainerInfo> {
    inspect_with(engine, path, DEFAULT_INSPECT_FLAGS)
}

/// Flags [`inspect`] opens containers with.
pub const DEFAULT_INSPECT_FLAGS: OpenFlags = OpenFlags::RDONLY.union(OpenFlags::FAST);

/// [`inspect`] with caller-chosen open flags, e.g. adding `STRICT` or
/// `IGNORE_DISABLED`.
pub fn inspect_with<E: VhdEngine>(
    engine: &E,
    path: &Path,
    flags: OpenFlags,
) -> Result<ContainerInfo> {
    let handle = engine
        .open(path, flags)
        .map_err(|e| Error::open_failure(path, e))?;

    let footer = handle.footer();
    let header = footer
        .disk_type()
        .filter(|disk_type| disk_type.has_header())
        .map(|_| handle.header());
    let chain_depth = handle.chain_depth()?;
    handle.close()?;

    debug!(
        path = %path.display(),
        disk_type = ?footer.disk_type(),
        chain_depth,
        "inspected container"
    );

    Ok(ContainerInfo {
        path: path.to_path_buf(),
        footer,
        header,
        chain_depth,
    })
}
