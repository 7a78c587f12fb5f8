//! Streaming conversion between raw images and VHD containers.
//!
//! Both directions move data through a single [`AlignedBuffer`] one chunk at
//! a time:
//! 1. Raw to container: create the destination through the engine, then
//!    write every chunk, or only its non-zero sector runs when sparse.
//! 2. Container to raw: read every sector back through the engine and write
//!    it verbatim, so the raw file is always fully allocated.
//!
//! # Example
//!
//! ```no_run
//! use vhdtool_core::convert::{raw_to_container, ConvertOptions};
//! use vhdtool_core::engine::libvhd::{LibvhdConfig, LibvhdEngine};
//! use std::path::Path;
//!
//! let engine = LibvhdEngine::load(&LibvhdConfig::default()).unwrap();
//! let options = ConvertOptions::sparse();
//!
//! raw_to_container(
//!     &engine,
//!     Path::new("disk.img"),
//!     Path::new("disk.vhd"),
//!     &options,
//!     None,
//! )
//! .unwrap();
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::buffer::{AlignedBuffer, DEFAULT_ALIGNMENT};
use crate::engine::{CreateFlags, DiskType, OpenFlags, VhdEngine, VhdHandle};
use crate::error::{Error, Result};
use crate::ops;
use crate::raw::RawImage;
use crate::sparse::SectorRuns;
use crate::vhd::SECTOR_SIZE;

/// Default number of sectors moved per engine call (2 MiB).
pub const DEFAULT_CHUNK_SECTORS: u32 = 4096;

const SECTOR: usize = SECTOR_SIZE as usize;

/// Options for a conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Type of container created by [`raw_to_container`].
    pub disk_type: DiskType,
    /// Skip all-zero sectors when writing a container.
    pub sparse: bool,
    /// Sectors per chunk.
    pub chunk_sectors: u32,
    /// Alignment of the staging buffer in bytes.
    pub alignment: usize,
    /// Flags passed to the engine's create call.
    pub create_flags: CreateFlags,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            disk_type: DiskType::Dynamic,
            sparse: false,
            chunk_sectors: DEFAULT_CHUNK_SECTORS,
            alignment: DEFAULT_ALIGNMENT,
            create_flags: CreateFlags::empty(),
        }
    }
}

impl ConvertOptions {
    /// Create options for a given disk type and sparseness.
    pub fn new(disk_type: DiskType, sparse: bool) -> Self {
        Self {
            disk_type,
            sparse,
            ..Self::default()
        }
    }

    /// Default options with sparse writing enabled.
    pub fn sparse() -> Self {
        Self::new(DiskType::Dynamic, true)
    }

    /// Chunk size in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSize`] if `chunk_sectors` is zero or the chunk
    /// does not fit in memory.
    pub fn chunk_bytes(&self) -> Result<usize> {
        if self.chunk_sectors == 0 {
            return Err(Error::invalid_size("chunk_sectors must be > 0"));
        }
        usize::try_from(self.chunk_sectors)
            .ok()
            .and_then(|n| n.checked_mul(SECTOR))
            .ok_or_else(|| {
                Error::invalid_size(format!("chunk of {} sectors too large", self.chunk_sectors))
            })
    }

    fn staging_buffer(&self) -> Result<AlignedBuffer> {
        AlignedBuffer::new(self.chunk_bytes()?, self.alignment)
    }
}

/// Phase of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionPhase {
    /// Nothing has been touched yet.
    Idle,
    /// Creating or opening the destination.
    Creating,
    /// Moving sectors.
    Streaming,
    /// Destination closed; conversion complete.
    Closed,
    /// A step failed. The destination may be partially written.
    Failed,
}

impl std::fmt::Display for ConversionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversionPhase::Idle => write!(f, "Idle"),
            ConversionPhase::Creating => write!(f, "Creating"),
            ConversionPhase::Streaming => write!(f, "Streaming"),
            ConversionPhase::Closed => write!(f, "Closed"),
            ConversionPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress information for a conversion.
#[derive(Debug, Clone)]
pub struct ConversionProgress {
    /// Current phase.
    pub phase: ConversionPhase,
    /// Sectors processed so far, written or skipped.
    pub sectors_processed: u64,
    /// Total sectors in the conversion.
    pub sectors_total: u64,
}

impl ConversionProgress {
    /// Create new progress information.
    pub fn new(phase: ConversionPhase, sectors_total: u64) -> Self {
        Self {
            phase,
            sectors_processed: 0,
            sectors_total,
        }
    }

    pub fn bytes_processed(&self) -> u64 {
        self.sectors_processed * SECTOR_SIZE
    }

    pub fn bytes_total(&self) -> u64 {
        self.sectors_total * SECTOR_SIZE
    }

    /// Calculate overall percentage complete.
    pub fn percent_complete(&self) -> f64 {
        if self.sectors_total == 0 {
            return match self.phase {
                ConversionPhase::Closed => 100.0,
                _ => 0.0,
            };
        }
        (self.sectors_processed as f64 / self.sectors_total as f64) * 100.0
    }
}

/// Type alias for the progress callback function.
pub type ProgressCallback = Box<dyn Fn(ConversionProgress) + Send>;

/// What a finished conversion did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    /// Logical size of the converted disk in sectors.
    pub total_sectors: u64,
    /// Sectors actually written to the destination.
    pub sectors_written: u64,
    /// Number of write calls issued.
    pub write_calls: u64,
}

impl ConversionSummary {
    /// Sectors that were skipped because they were all zero.
    pub fn sectors_skipped(&self) -> u64 {
        self.total_sectors - self.sectors_written
    }
}

struct Tracker<'a> {
    progress: ConversionProgress,
    callback: Option<&'a ProgressCallback>,
}

impl<'a> Tracker<'a> {
    /// The total is unknown until the source has been opened.
    fn new(callback: Option<&'a ProgressCallback>) -> Self {
        Self {
            progress: ConversionProgress::new(ConversionPhase::Idle, 0),
            callback,
        }
    }

    fn start(&mut self, sectors_total: u64) {
        self.progress.sectors_total = sectors_total;
        self.report();
    }

    fn phase(&mut self, phase: ConversionPhase) {
        self.progress.phase = phase;
        self.report();
    }

    fn advance(&mut self, sectors: u64) {
        self.progress.sectors_processed += sectors;
        self.report();
    }

    fn report(&self) {
        if let Some(callback) = self.callback {
            callback(self.progress.clone());
        }
    }

    /// Moves to [`ConversionPhase::Failed`] and hands the error back.
    fn fail(&mut self, error: Error) -> Error {
        warn!(error = %error, "conversion failed");
        self.phase(ConversionPhase::Failed);
        error
    }
}

/// Converts a raw image into a new container.
///
/// The destination is sized to the source rounded up to a whole sector.
/// A short final sector is zero-padded, and in sparse mode those padding
/// zeros are treated like any other zero bytes.
///
/// # Errors
///
/// - Configuration errors from `options`, before any I/O.
/// - [`Error::CreateFailure`] / [`Error::OpenFailure`] if the destination
///   cannot be created or opened.
/// - [`Error::ConversionFailure`] if a write fails. No further writes are
///   attempted and the destination is left as is.
pub fn raw_to_container<E: VhdEngine>(
    engine: &E,
    source: &Path,
    dest: &Path,
    options: &ConvertOptions,
    progress_callback: Option<ProgressCallback>,
) -> Result<ConversionSummary> {
    let mut tracker = Tracker::new(progress_callback.as_ref());
    let mut buf = options.staging_buffer().map_err(|e| tracker.fail(e))?;
    let chunk_bytes = buf.len();

    let image = RawImage::open(source).map_err(|e| tracker.fail(e))?;
    let size_bytes = image.padded_len();
    let total_sectors = size_bytes / SECTOR_SIZE;

    tracker.start(total_sectors);
    info!(
        source = %source.display(),
        dest = %dest.display(),
        size_bytes,
        disk_type = %options.disk_type,
        sparse = options.sparse,
        "converting raw image to container"
    );

    tracker.phase(ConversionPhase::Creating);
    ops::create(engine, dest, size_bytes, options.disk_type, options.create_flags)
        .map_err(|e| tracker.fail(Error::create_failure(dest, e)))?;
    let mut handle = engine
        .open(dest, OpenFlags::RDWR)
        .map_err(|e| tracker.fail(Error::open_failure(dest, e)))?;

    tracker.phase(ConversionPhase::Streaming);
    let mut summary = ConversionSummary {
        total_sectors,
        ..Default::default()
    };

    let chunks = image.chunks(chunk_bytes);
    debug!(chunks = chunks.count_chunks(), chunk_bytes, "streaming source");
    for chunk in chunks {
        debug!(
            index = chunk.index,
            start_sector = chunk.start_sector,
            sectors = chunk.sectors(),
            padding = chunk.padding,
            is_last = chunk.is_last,
            "streaming chunk"
        );
        let written = if options.sparse {
            write_runs(&mut handle, &mut buf, &chunk.data, chunk.start_sector, &mut summary)
        } else {
            write_span(&mut handle, &mut buf, &chunk.data, chunk.start_sector, &mut summary)
        };
        if let Err(e) = written {
            close_after_failure(handle);
            return Err(tracker.fail(e));
        }
        tracker.advance(chunk.sectors());
    }

    handle
        .close()
        .map_err(|e| tracker.fail(Error::conversion_failure(total_sectors, e)))?;
    tracker.phase(ConversionPhase::Closed);

    info!(
        dest = %dest.display(),
        sectors_written = summary.sectors_written,
        sectors_skipped = summary.sectors_skipped(),
        write_calls = summary.write_calls,
        "conversion complete"
    );
    Ok(summary)
}

/// Converts a container into a fully allocated raw image.
///
/// # Errors
///
/// - Configuration errors from `options`, before any I/O.
/// - [`Error::OpenFailure`] if the source cannot be opened.
/// - [`Error::Io`] if the destination cannot be created.
/// - [`Error::ConversionFailure`] if a read or write fails partway.
pub fn container_to_raw<E: VhdEngine>(
    engine: &E,
    source: &Path,
    dest: &Path,
    options: &ConvertOptions,
    progress_callback: Option<ProgressCallback>,
) -> Result<ConversionSummary> {
    let mut tracker = Tracker::new(progress_callback.as_ref());
    let mut buf = options.staging_buffer().map_err(|e| tracker.fail(e))?;
    let chunk_sectors = u64::from(options.chunk_sectors);

    let mut handle = engine
        .open(source, OpenFlags::RDONLY)
        .map_err(|e| tracker.fail(Error::open_failure(source, e)))?;
    let total_sectors = handle.footer().total_sectors();

    tracker.start(total_sectors);
    info!(
        source = %source.display(),
        dest = %dest.display(),
        total_sectors,
        "converting container to raw image"
    );

    tracker.phase(ConversionPhase::Creating);
    let file = match File::create(dest) {
        Ok(file) => file,
        Err(e) => {
            close_after_failure(handle);
            return Err(tracker.fail(Error::io(e, dest)));
        }
    };
    let mut out = BufWriter::new(file);

    tracker.phase(ConversionPhase::Streaming);
    let mut summary = ConversionSummary {
        total_sectors,
        ..Default::default()
    };

    let mut cur_sec = 0u64;
    while cur_sec < total_sectors {
        let num_secs = chunk_sectors.min(total_sectors - cur_sec);
        debug!(start_sector = cur_sec, sectors = num_secs, "reading chunk");
        if let Err(e) = read_span(&mut handle, &mut buf, &mut out, dest, cur_sec, num_secs) {
            close_after_failure(handle);
            return Err(tracker.fail(e));
        }
        summary.sectors_written += num_secs;
        summary.write_calls += 1;
        cur_sec += num_secs;
        tracker.advance(num_secs);
    }

    let flushed = out
        .flush()
        .map_err(|e| Error::conversion_failure(total_sectors, Error::io(e, dest)));
    let closed = handle
        .close()
        .map_err(|e| Error::conversion_failure(total_sectors, e));
    flushed.and(closed).map_err(|e| tracker.fail(e))?;
    tracker.phase(ConversionPhase::Closed);

    info!(dest = %dest.display(), sectors = total_sectors, "conversion complete");
    Ok(summary)
}

/// Writes `data`, a whole number of sectors, at `sector` in one call.
fn write_span<H: VhdHandle>(
    handle: &mut H,
    buf: &mut AlignedBuffer,
    data: &[u8],
    sector: u64,
    summary: &mut ConversionSummary,
) -> Result<()> {
    let sectors = (data.len() / SECTOR) as u32;
    buf.write(data, 0)
        .and_then(|()| handle.write(buf, sector, sectors))
        .map_err(|e| Error::conversion_failure(sector, e))?;
    summary.sectors_written += u64::from(sectors);
    summary.write_calls += 1;
    Ok(())
}

/// Writes each non-zero run of `chunk` at its absolute sector.
fn write_runs<H: VhdHandle>(
    handle: &mut H,
    buf: &mut AlignedBuffer,
    chunk: &[u8],
    start_sector: u64,
    summary: &mut ConversionSummary,
) -> Result<()> {
    let runs = SectorRuns::new(chunk, SECTOR).map_err(|e| Error::conversion_failure(start_sector, e))?;
    for run in runs {
        let sector = start_sector + run.start as u64;
        write_span(handle, buf, &chunk[run.byte_range(SECTOR)], sector, summary)?;
    }
    Ok(())
}

fn read_span<H: VhdHandle, W: Write>(
    handle: &mut H,
    buf: &mut AlignedBuffer,
    out: &mut W,
    dest: &Path,
    sector: u64,
    num_secs: u64,
) -> Result<()> {
    let len = num_secs as usize * SECTOR;
    handle
        .read(buf, sector, num_secs as u32)
        .and_then(|()| buf.slice(0, Some(len)))
        .and_then(|data| out.write_all(data).map_err(|e| Error::io(e, dest)))
        .map_err(|e| Error::conversion_failure(sector, e))
}

fn close_after_failure<H: VhdHandle>(handle: H) {
    if let Err(e) = handle.close() {
        warn!(error = %e, "failed to close container after error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_options_default() {
        let options = ConvertOptions::default();
        assert_eq!(options.disk_type, DiskType::Dynamic);
        assert!(!options.sparse);
        assert_eq!(options.chunk_sectors, DEFAULT_CHUNK_SECTORS);
        assert_eq!(options.alignment, 512);
        assert_eq!(options.chunk_bytes().unwrap(), 4096 * 512);
    }

    #[test]
    fn test_convert_options_sparse() {
        let options = ConvertOptions::sparse();
        assert!(options.sparse);
        assert_eq!(options.disk_type, DiskType::Dynamic);
    }

    #[test]
    fn test_zero_chunk_sectors_rejected() {
        let options = ConvertOptions {
            chunk_sectors: 0,
            ..Default::default()
        };
        assert!(matches!(
            options.chunk_bytes(),
            Err(Error::InvalidSize { .. })
        ));
    }

    #[test]
    fn test_conversion_phase_display() {
        assert_eq!(format!("{}", ConversionPhase::Idle), "Idle");
        assert_eq!(format!("{}", ConversionPhase::Creating), "Creating");
        assert_eq!(format!("{}", ConversionPhase::Streaming), "Streaming");
        assert_eq!(format!("{}", ConversionPhase::Closed), "Closed");
        assert_eq!(format!("{}", ConversionPhase::Failed), "Failed");
    }

    #[test]
    fn test_progress_percent_complete() {
        let mut progress = ConversionProgress::new(ConversionPhase::Streaming, 1000);
        assert_eq!(progress.percent_complete(), 0.0);

        progress.sectors_processed = 500;
        assert_eq!(progress.percent_complete(), 50.0);
        assert_eq!(progress.bytes_processed(), 500 * 512);
        assert_eq!(progress.bytes_total(), 1000 * 512);
    }

    #[test]
    fn test_progress_percent_complete_zero_total() {
        let progress = ConversionProgress::new(ConversionPhase::Streaming, 0);
        assert_eq!(progress.percent_complete(), 0.0);

        let closed = ConversionProgress::new(ConversionPhase::Closed, 0);
        assert_eq!(closed.percent_complete(), 100.0);
    }

    #[test]
    fn test_summary_skipped() {
        let summary = ConversionSummary {
            total_sectors: 10,
            sectors_written: 4,
            write_calls: 2,
        };
        assert_eq!(summary.sectors_skipped(), 6);
    }
}
