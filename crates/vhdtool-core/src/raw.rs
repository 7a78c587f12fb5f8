//! Raw disk image reader with memory-mapped I/O.
//!
//! Raw images are read through a memory map and handed out in fixed-size,
//! sector-padded chunks suitable for feeding the conversion pipeline.

use crate::error::{Error, Result};
use crate::vhd::SECTOR_SIZE;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// A memory-mapped raw disk image.
///
/// # Example
///
/// ```no_run
/// use vhdtool_core::raw::RawImage;
/// use std::path::Path;
///
/// let image = RawImage::open(Path::new("disk.img")).unwrap();
/// println!("Image size: {} bytes", image.len());
///
/// for chunk in image.chunks(4096 * 512) {
///     // Each chunk is a whole number of sectors.
///     assert_eq!(chunk.data.len() % 512, 0);
/// }
/// ```
pub struct RawImage {
    /// `None` for empty files, which cannot be mapped.
    mmap: Option<Mmap>,
    size: u64,
}

impl RawImage {
    /// Opens a raw image and maps it read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, stat'ed or mapped.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(e, path))?;
        let size = file.metadata().map_err(|e| Error::io(e, path))?.len();

        if size == 0 {
            return Ok(Self { mmap: None, size: 0 });
        }

        // Safety: the file is opened read-only and stays mapped for the
        // lifetime of the reader. Concurrent truncation by another process is
        // outside what this tool guards against.
        let mmap = unsafe { Mmap::map(&file).map_err(|e| Error::io(e, path))? };

        Ok(Self {
            mmap: Some(mmap),
            size,
        })
    }

    /// Size of the image in bytes.
    #[inline]
    pub fn len(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Size rounded up to the next whole sector.
    pub fn padded_len(&self) -> u64 {
        self.size.div_ceil(SECTOR_SIZE) * SECTOR_SIZE
    }

    /// Raw mapped bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    /// Iterates over chunks of `chunk_size` bytes.
    ///
    /// `chunk_size` should be a multiple of the sector size. The final chunk
    /// is zero-padded up to the next whole sector.
    pub fn chunks(&self, chunk_size: usize) -> SectorChunks<'_> {
        SectorChunks::new(self.data(), chunk_size)
    }
}

/// A chunk of raw image data with its position.
#[derive(Debug, Clone)]
pub struct SectorChunk {
    /// The zero-based index of this chunk in the sequence.
    pub index: u64,
    /// First sector of the chunk within the image.
    pub start_sector: u64,
    /// Chunk bytes, always a whole number of sectors.
    pub data: Vec<u8>,
    /// Number of trailing zero bytes added to complete the last sector.
    pub padding: usize,
    /// True if this is the last chunk in the image.
    pub is_last: bool,
}

impl SectorChunk {
    /// Number of sectors in the chunk.
    pub fn sectors(&self) -> u64 {
        self.data.len() as u64 / SECTOR_SIZE
    }
}

/// Iterator over sector-padded chunks of a raw image.
pub struct SectorChunks<'a> {
    data: &'a [u8],
    chunk_size: usize,
    current_offset: usize,
    current_index: u64,
}

impl<'a> SectorChunks<'a> {
    fn new(data: &'a [u8], chunk_size: usize) -> Self {
        Self {
            data,
            chunk_size,
            current_offset: 0,
            current_index: 0,
        }
    }

    /// Returns the total number of chunks that will be yielded.
    pub fn count_chunks(&self) -> usize {
        if self.chunk_size == 0 {
            return 0;
        }
        self.data.len().div_ceil(self.chunk_size)
    }
}

impl Iterator for SectorChunks<'_> {
    type Item = SectorChunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.chunk_size == 0 || self.current_offset >= self.data.len() {
            return None;
        }

        let remaining = self.data.len() - self.current_offset;
        let chunk_len = remaining.min(self.chunk_size);
        let start = self.current_offset;

        let mut data = self.data[start..start + chunk_len].to_vec();
        let sector = SECTOR_SIZE as usize;
        let padding = (sector - chunk_len % sector) % sector;
        data.resize(chunk_len + padding, 0);

        let chunk = SectorChunk {
            index: self.current_index,
            start_sector: (start / sector) as u64,
            data,
            padding,
            is_last: start + chunk_len == self.data.len(),
        };

        self.current_offset += chunk_len;
        self.current_index += 1;

        Some(chunk)
    }
}
