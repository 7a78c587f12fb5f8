//! Options for the engine's check and coalesce utilities.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Options for a consistency check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckOptions {
    /// Tolerate a missing or damaged primary footer (`-i`).
    pub ignore_missing_primary_footer: bool,
    /// Do not compare the parent's unique id (`-I`).
    pub ignore_parent_uuid: bool,
    /// Do not compare parent timestamps (`-t`).
    pub ignore_timestamps: bool,
    /// Check every ancestor in the chain (`-p`).
    pub check_parents: bool,
    /// Check block bitmaps against the allocation table (`-b`).
    pub check_data: bool,
    /// Print allocation statistics (`-s`).
    pub stats: bool,
    /// Skip the allocation table overlap scan (`-B`).
    pub skip_bat_overlap_check: bool,
}

impl CheckOptions {
    /// Rejects flag combinations the engine cannot honour.
    ///
    /// Skipping the overlap scan leaves the engine without the block map that
    /// both the bitmap check and the statistics need.
    pub fn validate(&self) -> Result<()> {
        if self.skip_bat_overlap_check && (self.check_data || self.stats) {
            return Err(Error::mutually_exclusive(
                "skip_bat_overlap_check cannot be combined with check_data or stats",
            ));
        }
        Ok(())
    }

    /// Builds the engine's argument vector for checking `path`.
    pub fn to_args(&self, path: &Path) -> Vec<String> {
        let mut args = vec![
            "check".to_string(),
            "-n".to_string(),
            path.to_string_lossy().into_owned(),
        ];
        let switches = [
            (self.ignore_missing_primary_footer, "-i"),
            (self.ignore_parent_uuid, "-I"),
            (self.ignore_timestamps, "-t"),
            (self.check_parents, "-p"),
            (self.check_data, "-b"),
            (self.stats, "-s"),
            (self.skip_bat_overlap_check, "-B"),
        ];
        args.extend(
            switches
                .iter()
                .filter(|(on, _)| *on)
                .map(|(_, flag)| flag.to_string()),
        );
        args
    }
}

/// Where a coalesce writes the merged data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoalesceTarget {
    /// Write the merged chain into a new file.
    Output(PathBuf),
    /// Merge everything down to the given ancestor.
    Ancestor(PathBuf),
    /// Merge into the immediate parent, then reparent onto this file.
    StepParent(PathBuf),
}

impl CoalesceTarget {
    /// Picks the target from three optional arguments.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MutuallyExclusiveArguments`] unless exactly one of
    /// the three is present.
    pub fn from_options(
        output: Option<PathBuf>,
        ancestor: Option<PathBuf>,
        step_parent: Option<PathBuf>,
    ) -> Result<Self> {
        match (output, ancestor, step_parent) {
            (Some(path), None, None) => Ok(CoalesceTarget::Output(path)),
            (None, Some(path), None) => Ok(CoalesceTarget::Ancestor(path)),
            (None, None, Some(path)) => Ok(CoalesceTarget::StepParent(path)),
            (None, None, None) => Err(Error::mutually_exclusive(
                "one of output, ancestor or step_parent is required",
            )),
            _ => Err(Error::mutually_exclusive(
                "output, ancestor and step_parent are mutually exclusive",
            )),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            CoalesceTarget::Output(path)
            | CoalesceTarget::Ancestor(path)
            | CoalesceTarget::StepParent(path) => path,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CoalesceTarget::Output(_) => "output",
            CoalesceTarget::Ancestor(_) => "ancestor",
            CoalesceTarget::StepParent(_) => "step_parent",
        }
    }
}
