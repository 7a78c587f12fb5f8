//! Zero-sector run detection for sparse conversion.
//!
//! A raw chunk is scanned sector by sector; contiguous non-zero sectors are
//! merged into one [`SectorRun`] and all-zero sectors are left out, so the
//! writer can skip them and leave the container's blocks unallocated.

use crate::error::{Error, Result};

/// Half-open range `[start, end)` of chunk-relative sector indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRun {
    pub start: usize,
    pub end: usize,
}

impl SectorRun {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of sectors in the run.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Byte range of the run within its chunk.
    pub fn byte_range(&self, sector_size: usize) -> std::ops::Range<usize> {
        self.start * sector_size..self.end * sector_size
    }
}

/// Iterator over the non-zero sector runs of a chunk.
pub struct SectorRuns<'a> {
    sectors: std::slice::ChunksExact<'a, u8>,
    index: usize,
}

impl<'a> SectorRuns<'a> {
    /// Creates a run iterator over `chunk`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSize`] if `sector_size` is zero or the chunk is
    /// not a whole number of sectors.
    pub fn new(chunk: &'a [u8], sector_size: usize) -> Result<Self> {
        if sector_size == 0 {
            return Err(Error::invalid_size("Sector size must be > 0"));
        }
        if chunk.len() % sector_size != 0 {
            return Err(Error::invalid_size(format!(
                "Chunk length {} is not a multiple of sector size {}",
                chunk.len(),
                sector_size
            )));
        }
        Ok(Self {
            sectors: chunk.chunks_exact(sector_size),
            index: 0,
        })
    }
}

impl Iterator for SectorRuns<'_> {
    type Item = SectorRun;

    fn next(&mut self) -> Option<Self::Item> {
        // Skip leading zero sectors.
        let start = loop {
            let sector = self.sectors.next()?;
            let i = self.index;
            self.index += 1;
            if !is_zero(sector) {
                break i;
            }
        };

        // Extend until the next zero sector or the end of the chunk.
        loop {
            match self.sectors.next() {
                Some(sector) => {
                    let i = self.index;
                    self.index += 1;
                    if is_zero(sector) {
                        return Some(SectorRun::new(start, i));
                    }
                }
                None => return Some(SectorRun::new(start, self.index)),
            }
        }
    }
}

/// Collects the non-zero sector runs of `chunk`.
///
/// Sector `i` lies in some returned run iff its bytes are not all zero, and
/// adjacent non-zero sectors always share a run.
pub fn find_runs(chunk: &[u8], sector_size: usize) -> Result<Vec<SectorRun>> {
    Ok(SectorRuns::new(chunk, sector_size)?.collect())
}

#[inline]
fn is_zero(sector: &[u8]) -> bool {
    sector.iter().all(|&b| b == 0)
}
