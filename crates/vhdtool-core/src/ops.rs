//! Container maintenance operations delegated to the engine.
//!
//! Each operation validates its arguments first, so a bad combination never
//! reaches the engine.

use std::path::Path;

use tracing::{debug, info};

use crate::engine::{CheckOptions, CoalesceTarget, CreateFlags, DiskType, VhdEngine};
use crate::error::{Error, Result};
use crate::vhd::SECTOR_SIZE;

/// Creates an empty container of `size_bytes` logical bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidSize`] if `size_bytes` is not a multiple of the
/// sector size, without calling the engine.
pub fn create<E: VhdEngine>(
    engine: &E,
    path: &Path,
    size_bytes: u64,
    disk_type: DiskType,
    flags: CreateFlags,
) -> Result<()> {
    if size_bytes % SECTOR_SIZE != 0 {
        return Err(Error::invalid_size(format!(
            "size {} is not a multiple of {}",
            size_bytes, SECTOR_SIZE
        )));
    }
    debug!(path = %path.display(), size_bytes, %disk_type, "creating container");
    engine.create(path, size_bytes, disk_type, flags)
}

/// Runs the engine's consistency check on `path`.
pub fn check<E: VhdEngine>(engine: &E, path: &Path, options: &CheckOptions) -> Result<()> {
    options.validate()?;
    debug!(path = %path.display(), ?options, "checking container");
    engine.check(path, options)?;
    info!(path = %path.display(), "check passed");
    Ok(())
}

/// Coalesces `path` into `target`.
pub fn coalesce<E: VhdEngine>(
    engine: &E,
    path: &Path,
    target: &CoalesceTarget,
    sparse: bool,
) -> Result<()> {
    debug!(
        path = %path.display(),
        kind = target.kind(),
        target = %target.path().display(),
        sparse,
        "coalescing container"
    );
    engine.coalesce(path, target, sparse)?;
    info!(path = %path.display(), target = %target.path().display(), "coalesce complete");
    Ok(())
}

/// Convenience form of [`coalesce`] taking the three optional targets.
///
/// # Errors
///
/// Returns [`Error::MutuallyExclusiveArguments`] unless exactly one target
/// is given. The engine is not called in that case.
pub fn coalesce_with<E: VhdEngine>(
    engine: &E,
    path: &Path,
    output: Option<&Path>,
    ancestor: Option<&Path>,
    step_parent: Option<&Path>,
    sparse: bool,
) -> Result<()> {
    let target = CoalesceTarget::from_options(
        output.map(Path::to_path_buf),
        ancestor.map(Path::to_path_buf),
        step_parent.map(Path::to_path_buf),
    )?;
    coalesce(engine, path, &target, sparse)
}
